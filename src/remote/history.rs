//! Local append-only log of submitted request ids

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const HISTORY_FILE_NAME: &str = ".circuitpack-history";

#[derive(Debug, Clone)]
pub struct RequestHistory {
    path: PathBuf,
}

impl RequestHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.circuitpack-history`, or `None` when there is no home directory
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(HISTORY_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one id per line. Failures are logged and otherwise ignored; the
    /// history is an operator convenience, not part of the job.
    pub fn append(&self, request_id: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", request_id));

        match result {
            Ok(()) => debug!(path = %self.path.display(), request_id, "Recorded request id"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to record request id"),
        }
    }
}
