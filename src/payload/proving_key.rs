//! Proving key references attached to a build payload

use crate::error::BuildError;
use crate::fs::FileSystem;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;
use tracing::debug;

/// Largest body the remote compiler accepts in one request
pub const MAX_POST_SIZE: usize = 6 * 1024 * 1024;

/// Where the remote side gets its final proving key from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvingKey {
    /// Externally hosted, fetched by the remote side
    Url(String),
    /// Base64 of a local file, sent inline
    Inline(String),
}

impl ProvingKey {
    /// Turns a `--proving-key` argument into a payload reference.
    ///
    /// `https` references are passed through untouched; anything else is read from
    /// disk and must fit in a single request once encoded.
    pub fn prepare(fs: &dyn FileSystem, reference: &str) -> Result<Self, BuildError> {
        if reference.starts_with("https") {
            return Ok(ProvingKey::Url(reference.to_string()));
        }

        let bytes = fs.read(Path::new(reference)).map_err(|e| {
            BuildError::ProvingKey(format!("cannot read {}: {}", reference, e))
        })?;
        let encoded = STANDARD.encode(&bytes);
        if encoded.len() > MAX_POST_SIZE {
            return Err(BuildError::ProvingKey(format!(
                "Proving key too large for inline upload. (Max {}) Host on https server instead.",
                format_bytes(MAX_POST_SIZE as u64)
            )));
        }

        debug!(
            file = reference,
            size = %format_bytes(bytes.len() as u64),
            "Inlining proving key"
        );
        Ok(ProvingKey::Inline(encoded))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProvingKey::Url(s) | ProvingKey::Inline(s) => s,
        }
    }
}

/// Human readable byte count with up to two decimals, e.g. `6 MB`, `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
