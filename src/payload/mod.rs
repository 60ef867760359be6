//! Build payload assembly
//!
//! Turns a resolved [`SourceBundle`] into the JSON document the remote compiler
//! expects: every file's content with include paths rewritten against the shortened
//! keys, the entry's main declaration lifted into a structured `circuit` descriptor,
//! and build options resolved by precedence (CLI > marker config > default).

mod proving_key;

pub use proving_key::{format_bytes, ProvingKey, MAX_POST_SIZE};

use crate::error::BuildError;
use crate::fs::FileSystem;
use crate::source::parser;
use crate::source::search::relative_to;
use crate::source::SourceBundle;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PROTOCOL: &str = "groth16";
pub const DEFAULT_PRIME: &str = "bn128";
pub const PIPELINE: &str = "circom";
const CIRCOM_PATH_PREFIX: &str = "circom-";

/// Options given explicitly by the caller; `None` falls back to the marker config,
/// then to the built-in default.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub protocol: Option<String>,
    /// `https` URL or local file path
    pub proving_key: Option<String>,
    pub ptau: Option<String>,
    pub circom_version: Option<String>,
    pub snarkjs_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub code: String,
}

/// Structured replacement for the removed `component main` statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitDescriptor {
    /// Entry short name without extension
    pub file: String,
    pub version: String,
    pub template: String,
    pub params: Vec<String>,
    pub pubs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub pipeline: String,
    pub files: IndexMap<String, SourceFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_zkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snarkjs_version: Option<String>,
    pub circom_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<Value>,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptau_size: Option<String>,
    pub prime: String,
    pub circuit: CircuitDescriptor,
}

pub struct PayloadBuilder {
    fs: Arc<dyn FileSystem>,
    default_circom_path: String,
}

impl PayloadBuilder {
    pub fn new(fs: Arc<dyn FileSystem>, default_circom_path: impl Into<String>) -> Self {
        Self {
            fs,
            default_circom_path: default_circom_path.into(),
        }
    }

    pub fn build(&self, bundle: &SourceBundle, options: &BuildOptions) -> Result<Payload, BuildError> {
        let Some((entry_key, entry)) = bundle.entry() else {
            return Err(BuildError::MissingMainComponent {
                file: Default::default(),
            });
        };
        let Some(main) = entry.main_declaration.as_ref() else {
            return Err(BuildError::MissingMainComponent {
                file: entry.resolved_path.clone(),
            });
        };

        let mut files = IndexMap::new();
        for (key, node) in &bundle.files {
            let content = if key == entry_key {
                parser::remove_main_declaration(&node.raw_content, main)
                    .unwrap_or_else(|| node.raw_content.clone())
            } else {
                node.raw_content.clone()
            };

            let dir = short_dir(key);
            let replacements: HashMap<&str, String> = node
                .includes
                .iter()
                .map(|(literal, target)| (literal.as_str(), relative_to(dir, target)))
                .collect();

            files.insert(
                key.clone(),
                SourceFile {
                    code: parser::rewrite_includes(&content, &replacements),
                },
            );
        }

        let circom_path = match &options.circom_version {
            Some(version) => format!("{}{}", CIRCOM_PATH_PREFIX, version),
            None => self.default_circom_path.clone(),
        };
        let marker = bundle.config.clone().unwrap_or_default();
        let final_zkey = options
            .proving_key
            .as_deref()
            .map(|reference| ProvingKey::prepare(self.fs.as_ref(), reference))
            .transpose()?
            .map(|key| key.as_str().to_string());

        let payload = Payload {
            pipeline: PIPELINE.to_string(),
            final_zkey,
            snarkjs_version: options.snarkjs_version.clone(),
            optimization: marker.optimization.clone(),
            protocol: resolve_option(options.protocol.as_ref(), marker.protocol.as_ref(), DEFAULT_PROTOCOL),
            ptau_size: options.ptau.clone(),
            prime: resolve_option(None, marker.prime.as_ref(), DEFAULT_PRIME),
            circuit: CircuitDescriptor {
                file: strip_extension(entry_key),
                version: compiler_version(&circom_path),
                template: main.template_name.clone(),
                params: main.positional_args.clone(),
                pubs: main.public_signal_names.clone(),
            },
            circom_path,
            files,
        };

        debug!(
            files = payload.files.len(),
            template = %payload.circuit.template,
            protocol = %payload.protocol,
            "Built payload"
        );
        Ok(payload)
    }
}

fn resolve_option(cli: Option<&String>, marker: Option<&String>, default: &str) -> String {
    cli.or(marker)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

/// Directory part of a short key, `""` at the bundle root.
fn short_dir(key: &str) -> &str {
    key.rfind('/').map(|idx| &key[..idx]).unwrap_or("")
}

fn strip_extension(key: &str) -> String {
    Path::new(key).with_extension("").to_string_lossy().into_owned()
}

/// `circom-v2.1.8` -> `2.1.8`
fn compiler_version(circom_path: &str) -> String {
    let version = circom_path
        .strip_prefix(CIRCOM_PATH_PREFIX)
        .unwrap_or(circom_path);
    version.strip_prefix('v').unwrap_or(version).to_string()
}

/// `Found N file(s):` listing of the bundle's short paths
pub fn describe_files(payload: &Payload) -> String {
    let mut out = format!("Found {} file(s):\n", payload.files.len());
    for key in payload.files.keys() {
        out.push_str(&format!("    {}\n", key));
    }
    out
}
