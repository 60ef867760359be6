//! Per-project marker configuration (`circomkit.json`)

use crate::error::BuildError;
use crate::fs::FileSystem;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;

/// File name searched upward from the entry file's directory
pub const MARKER_FILE_NAME: &str = "circomkit.json";

/// Settings read from the marker file. All fields are optional; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MarkerConfig {
    /// Extra include search roots, relative to the marker file's directory
    #[serde(default, deserialize_with = "string_list_or_empty")]
    pub include: Vec<String>,

    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub optimization: Option<Value>,

    #[serde(default)]
    pub prime: Option<String>,
}

impl MarkerConfig {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Reads and parses the marker file at `path`.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, BuildError> {
        let text = fs.read_to_string(path)?;
        Self::parse(&text).map_err(|e| BuildError::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

// A non-array `include` is ignored rather than rejected.
fn string_list_or_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    #[test]
    fn test_parse_full_config() {
        let config = MarkerConfig::parse(
            r#"{"include": ["lib", "../shared"], "protocol": "plonk", "optimization": 2, "prime": "bls12381", "version": "2.1.8"}"#,
        )
        .unwrap();
        assert_eq!(config.include, vec!["lib", "../shared"]);
        assert_eq!(config.protocol.as_deref(), Some("plonk"));
        assert_eq!(config.optimization, Some(Value::from(2)));
        assert_eq!(config.prime.as_deref(), Some("bls12381"));
    }

    #[test]
    fn test_empty_object_is_valid() {
        assert_eq!(MarkerConfig::parse("{}").unwrap(), MarkerConfig::default());
    }

    #[test]
    fn test_non_array_include_is_ignored() {
        let config = MarkerConfig::parse(r#"{"include": "lib"}"#).unwrap();
        assert!(config.include.is_empty());
    }

    #[test]
    fn test_unparseable_file_is_invalid_config() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/circomkit.json", "{ not json");

        let err = MarkerConfig::load(&fs, Path::new("/p/circomkit.json")).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }
}
