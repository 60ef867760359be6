//! Error taxonomy for bundling and remote builds
//!
//! Every failure the library surfaces is a [`BuildError`]. Each variant maps to a
//! stable machine-readable code (see [`BuildError::code`]) that the CLI prints next
//! to the human-readable message.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving sources or driving a remote build
#[derive(Debug, Error)]
pub enum BuildError {
    /// An include could not be located anywhere on the search path
    #[error("{}", format_not_found(include, parent.as_deref(), tried, extra_locations))]
    NotFound {
        include: String,
        parent: Option<PathBuf>,
        tried: Vec<PathBuf>,
        extra_locations: Vec<String>,
    },

    /// An include chain leads back to a file that is still being expanded
    #[error("NOT_FOUND\n\nCircular include of {include}:\n  {}", chain.join("\n  -> "))]
    CircularInclude { include: String, chain: Vec<String> },

    /// The marker configuration file exists but could not be parsed
    #[error("Invalid marker config {}: {reason}", path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    /// The entry file has no `component main` declaration
    #[error("Missing main component declaration in {}", file.display())]
    MissingMainComponent { file: PathBuf },

    /// Requested instance size is not in the supported table
    #[error("Invalid instance size '{requested}'. Supported sizes (GB): {}", supported.join(", "))]
    InvalidInstanceSize {
        requested: String,
        supported: Vec<String>,
    },

    /// Connection-level failure that persisted past the retry ceiling
    #[error("Network failure after {attempts} attempt(s): {message}")]
    NetworkTransient { attempts: u32, message: String },

    /// The remote compiler reported an application-level error
    #[error("Remote compiler error ({error_type}): {message}")]
    Application { error_type: String, message: String },

    /// HTTP-level error response, surfaced without retrying
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// Request failed for a reason that retrying would not fix
    #[error("Request failed: {0}")]
    Request(String),

    /// A response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Instance provisioning failed: {0}")]
    InstanceProvisionFailed(String),

    /// Health check exceeded its timeout; the instance was terminated
    #[error(
        "Instance for request {request_id} stopped responding (no answer within {timeout_secs}s) and was terminated. \
         This is usually caused by running out of memory; try a larger instance size."
    )]
    InstanceUnresponsive { request_id: String, timeout_secs: u64 },

    #[error("Instance termination failed: {0}")]
    TerminationFailed(String),

    /// The status log never reported completion within the allowed wait
    #[error("Timed out after {waited_secs}s waiting for request {request_id}")]
    TimedOut {
        request_id: String,
        waited_secs: u64,
    },

    /// Interrupted by the operator before reaching a terminal state
    #[error("Request {request_id} was cancelled")]
    Cancelled { request_id: String },

    /// The status log reported a build failure
    #[error("Build {request_id} failed: {message}")]
    BuildFailed { request_id: String, message: String },

    /// Resumed log completed but no package identifier could be recovered
    #[error("Could not recover package name from status log of {0}")]
    InvalidResumeLog(String),

    #[error("Proving key error: {0}")]
    ProvingKey(String),

    #[error(
        "Missing API key. Pass --api-key, set CIRCUITPACK_API_KEY, or run `circuitpack login <apiKey>`"
    )]
    MissingApiKey,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Stable code for this error class
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::NotFound { .. } | BuildError::CircularInclude { .. } => "NOT_FOUND",
            BuildError::InvalidConfig { .. } => "INVALID_CONFIG",
            BuildError::MissingMainComponent { .. } => "MISSING_MAIN_COMPONENT",
            BuildError::InvalidInstanceSize { .. } => "INVALID_INSTANCE_SIZE",
            BuildError::NetworkTransient { .. } => "NETWORK_TRANSIENT",
            BuildError::Application { .. } => "APPLICATION_ERROR",
            BuildError::Http { .. } => "HTTP_ERROR",
            BuildError::Request(_) => "REQUEST_FAILED",
            BuildError::InvalidResponse(_) => "INVALID_RESPONSE",
            BuildError::InstanceProvisionFailed(_) => "INSTANCE_PROVISION_FAILED",
            BuildError::InstanceUnresponsive { .. } => "INSTANCE_UNRESPONSIVE",
            BuildError::TerminationFailed(_) => "TERMINATION_FAILED",
            BuildError::TimedOut { .. } => "TIMED_OUT",
            BuildError::Cancelled { .. } => "CANCELLED",
            BuildError::BuildFailed { .. } => "BUILD_FAILED",
            BuildError::InvalidResumeLog(_) => "INVALID_RESUME_LOG",
            BuildError::ProvingKey(_) => "PROVING_KEY",
            BuildError::MissingApiKey => "MISSING_API_KEY",
            BuildError::Io(_) => "IO_ERROR",
        }
    }
}

fn format_not_found(
    include: &str,
    parent: Option<&std::path::Path>,
    tried: &[PathBuf],
    extra_locations: &[String],
) -> String {
    let mut out = format!("NOT_FOUND\n\n{}", include);
    if let Some(parent) = parent {
        out.push_str(&format!(" from {}", parent.display()));
    }
    out.push_str("\n\nTried:\n");
    for path in tried {
        out.push_str(&format!("  {}\n", path.display()));
    }
    if extra_locations.is_empty() {
        out.push_str("\nConsider creating a circomkit.json file to specify more search locations.\n");
    } else {
        out.push_str("Extra locations from circomkit.json:\n");
        for location in extra_locations {
            out.push_str(&format!("  {}\n", location));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_attempts_in_order() {
        let err = BuildError::NotFound {
            include: "lib.circom".to_string(),
            parent: Some(PathBuf::from("/p/main.circom")),
            tried: vec![PathBuf::from("/p/lib.circom"), PathBuf::from("/p/node_modules/lib.circom")],
            extra_locations: vec![],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("NOT_FOUND"));
        assert!(msg.contains("lib.circom from /p/main.circom"));
        let first = msg.find("/p/lib.circom").unwrap();
        let second = msg.find("/p/node_modules/lib.circom").unwrap();
        assert!(first < second);
        assert!(msg.contains("Consider creating a circomkit.json"));
    }

    #[test]
    fn test_not_found_with_extra_locations() {
        let err = BuildError::NotFound {
            include: "x.circom".to_string(),
            parent: None,
            tried: vec![PathBuf::from("/a/x.circom")],
            extra_locations: vec!["lib".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Extra locations from circomkit.json:\n  lib"));
        assert!(!msg.contains("Consider creating"));
    }

    #[test]
    fn test_codes() {
        assert_eq!(BuildError::MissingApiKey.code(), "MISSING_API_KEY");
        assert_eq!(
            BuildError::InstanceUnresponsive {
                request_id: "r".to_string(),
                timeout_secs: 8
            }
            .code(),
            "INSTANCE_UNRESPONSIVE"
        );
        assert_eq!(
            BuildError::Application {
                error_type: "Error".to_string(),
                message: "boom".to_string()
            }
            .code(),
            "APPLICATION_ERROR"
        );
    }

    #[test]
    fn test_unresponsive_suggests_larger_size() {
        let err = BuildError::InstanceUnresponsive {
            request_id: "abc".to_string(),
            timeout_secs: 8,
        };
        assert!(err.to_string().contains("larger instance size"));
    }
}
