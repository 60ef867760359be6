//! FileSystem trait definition

use std::io;
use std::path::Path;

/// Abstraction over the file operations the resolver and payload builder need.
///
/// Reads return `io::Result` so callers can tell a missing file
/// (`io::ErrorKind::NotFound`) apart from any other failure.
pub trait FileSystem: Send + Sync {
    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if path is a regular file
    fn is_file(&self, path: &Path) -> bool;

    /// Read file contents as string
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Read file contents as raw bytes
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}
