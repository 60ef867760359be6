//! Upward search for marker files and lexical path helpers

use crate::fs::FileSystem;
use std::path::{Component, Path, PathBuf};

/// Walks from `dir` up through its ancestors and returns the first `dir/filename`
/// that exists as a file.
pub fn find_closest_file(fs: &dyn FileSystem, dir: &Path, filename: &str) -> Option<PathBuf> {
    let start = normalize(dir);
    let mut current = Some(start.as_path());

    while let Some(dir) = current {
        let candidate = dir.join(filename);
        if fs.is_file(&candidate) {
            return Some(candidate);
        }
        current = dir.parent();
    }

    None
}

/// Resolves `.` and `..` components without touching the file system.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of `target` relative to directory `from`, both given as `/`-separated
/// relative strings (an empty `from` is the bundle root).
pub fn relative_to(from: &str, target: &str) -> String {
    let from_parts: Vec<&str> = from.split('/').filter(|p| !p.is_empty()).collect();
    let target_parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();

    let common = from_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    parts.extend(std::iter::repeat("..").take(from_parts.len() - common));
    parts.extend(&target_parts[common..]);
    parts.join("/")
}
