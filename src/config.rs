//! Configuration management for circuitpack
//!
//! Settings come from three places:
//!
//! - process environment, read by [`CircuitpackConfig::default`]
//! - the remote service map published at the config URL ([`RemoteConfig`])
//! - the per-user file `~/.circuitpack` holding the API key ([`UserConfig`])
//!
//! # Environment Variables
//!
//! - `CIRCUITPACK_CONFIG_URL`: service map URL - default: "https://circuitscan.org/cli.json"
//! - `CIRCUITPACK_LOCAL_COMPILER`: compiler endpoint override (takes precedence over everything)
//! - `CIRCUITPACK_LOCAL_PROVISIONER`: provisioning endpoint override
//! - `CIRCUITPACK_API_KEY`: API key, used when `--api-key` is absent
//! - `CIRCUITPACK_REQUEST_TIMEOUT`: HTTP timeout in seconds - default: "30"
//! - `CIRCUITPACK_STATUS_INTERVAL_MS`: status log poll interval - default: "3000"
//! - `CIRCUITPACK_HEALTH_TIMEOUT_SECS`: instance health probe timeout - default: "8"
//! - `CIRCUITPACK_MAX_WAIT_SECS`: ceiling on waiting for a job - default: "7200"
//! - `CIRCUITPACK_LOG_LEVEL`: logging level - default: "warn"

use crate::error::BuildError;
use crate::remote::{
    Endpoints, InstanceSettings, OrchestratorSettings, PollSettings, RetryPolicy, Transport,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_CONFIG_URL: &str = "https://circuitscan.org/cli.json";
const DEFAULT_LOG_LEVEL: &str = "warn";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATUS_INTERVAL_MS: u64 = 3000;
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 8;
const DEFAULT_MAX_WAIT_SECS: u64 = 7200;

pub const USER_CONFIG_FILE_NAME: &str = ".circuitpack";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The service map could not be fetched or parsed
    #[error("INVALID_CONFIG_URL: could not load service map from {url}: {reason}")]
    InvalidConfigUrl { url: String, reason: String },

    #[error("Failed to read user config {}: {reason}", path.display())]
    UserConfig { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub struct CircuitpackConfig {
    pub config_url: String,
    pub local_compiler: Option<String>,
    pub local_provisioner: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub status_interval_ms: u64,
    pub health_timeout_secs: u64,
    pub max_wait_secs: u64,
    pub log_level: String,
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

impl Default for CircuitpackConfig {
    /// Loads from `CIRCUITPACK_*` environment variables with defaults
    fn default() -> Self {
        Self {
            config_url: env_string("CIRCUITPACK_CONFIG_URL")
                .unwrap_or_else(|| DEFAULT_CONFIG_URL.to_string()),
            local_compiler: env_string("CIRCUITPACK_LOCAL_COMPILER"),
            local_provisioner: env_string("CIRCUITPACK_LOCAL_PROVISIONER"),
            api_key: env_string("CIRCUITPACK_API_KEY"),
            request_timeout_secs: env_u64("CIRCUITPACK_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS),
            status_interval_ms: env_u64("CIRCUITPACK_STATUS_INTERVAL_MS", DEFAULT_STATUS_INTERVAL_MS),
            health_timeout_secs: env_u64("CIRCUITPACK_HEALTH_TIMEOUT_SECS", DEFAULT_HEALTH_TIMEOUT_SECS),
            max_wait_secs: env_u64("CIRCUITPACK_MAX_WAIT_SECS", DEFAULT_MAX_WAIT_SECS),
            log_level: env::var("CIRCUITPACK_LOG_LEVEL")
                .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        }
    }
}

impl CircuitpackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }
        if self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout cannot exceed 10 minutes".to_string(),
            ));
        }
        if self.status_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "Status interval must be positive".to_string(),
            ));
        }
        if self.health_timeout_secs < 2 {
            return Err(ConfigError::ValidationFailed(
                "Health timeout must be at least 2 seconds".to_string(),
            ));
        }
        if self.max_wait_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Maximum wait must be at least 1 second".to_string(),
            ));
        }
        for (name, url) in [
            ("config URL", Some(&self.config_url)),
            ("local compiler", self.local_compiler.as_ref()),
            ("local provisioner", self.local_provisioner.as_ref()),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::ValidationFailed(format!(
                        "Invalid {}: {} (expected an http(s) URL)",
                        name, url
                    )));
                }
            }
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Timing knobs for the orchestrator. The watchdog probes one second less than
    /// its interval so a slow probe is caught before the next one starts.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let health_interval = Duration::from_secs(self.health_timeout_secs);
        OrchestratorSettings {
            poll: PollSettings {
                interval: Duration::from_millis(self.status_interval_ms),
                max_wait: Some(Duration::from_secs(self.max_wait_secs)),
            },
            instance: InstanceSettings {
                health_interval,
                health_timeout: health_interval.saturating_sub(Duration::from_secs(1)),
                ..Default::default()
            },
            retry: RetryPolicy::default(),
            ..Default::default()
        }
    }

    /// Service endpoints with local overrides applied
    pub fn endpoints(&self, remote: &RemoteConfig) -> Endpoints {
        Endpoints {
            compiler: remote.compiler_url.clone(),
            local_compiler: self.local_compiler.clone(),
            provisioner: self
                .local_provisioner
                .clone()
                .unwrap_or_else(|| remote.provisioner_url.clone()),
            blob_base: remote.blob_url.clone(),
        }
    }
}

impl fmt::Display for CircuitpackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Circuitpack Configuration:")?;
        writeln!(f, "  Config URL: {}", self.config_url)?;
        if let Some(url) = &self.local_compiler {
            writeln!(f, "  Local Compiler: {}", url)?;
        }
        if let Some(url) = &self.local_provisioner {
            writeln!(f, "  Local Provisioner: {}", url)?;
        }
        writeln!(f, "  API Key: {}", if self.api_key.is_some() { "set" } else { "unset" })?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Status Interval: {}ms", self.status_interval_ms)?;
        writeln!(f, "  Health Timeout: {}s", self.health_timeout_secs)?;
        writeln!(f, "  Max Wait: {}s", self.max_wait_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

/// Service map published at the config URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub blob_url: String,
    #[serde(alias = "ec2CompilerURL")]
    pub compiler_url: String,
    #[serde(alias = "terminatorURL")]
    pub provisioner_url: String,
    pub default_circom_path: String,
}

impl RemoteConfig {
    pub async fn fetch(transport: &dyn Transport, url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidConfigUrl {
            url: url.to_string(),
            reason,
        };
        let response = transport.get(url).await.map_err(|e| invalid(e.to_string()))?;
        if !response.is_success() {
            return Err(invalid(format!("HTTP {}", response.status)));
        }
        let config: Self = serde_json::from_str(&response.body).map_err(|e| invalid(e.to_string()))?;
        debug!(url, blob = %config.blob_url, "Loaded service map");
        Ok(config)
    }
}

/// Per-user settings file. Unknown keys are kept so saving never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(USER_CONFIG_FILE_NAME))
    }

    /// Reads the file at `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::UserConfig {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_str(&text).map_err(|e| ConfigError::UserConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let to_error = |reason: String| ConfigError::UserConfig {
            path: path.to_path_buf(),
            reason,
        };
        let text = serde_json::to_string_pretty(self).map_err(|e| to_error(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| to_error(e.to_string()))
    }
}

/// API key precedence: explicit flag, then environment, then the user config file.
pub fn resolve_api_key(
    flag: Option<&str>,
    config: &CircuitpackConfig,
    user: Option<&UserConfig>,
) -> Result<String, BuildError> {
    flag.map(str::to_string)
        .or_else(|| config.api_key.clone())
        .or_else(|| user.and_then(|u| u.api_key.clone()))
        .filter(|key| !key.trim().is_empty())
        .ok_or(BuildError::MissingApiKey)
}
