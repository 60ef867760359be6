use super::FileSystem;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// In-memory file system. Relative paths are placed under the mock root.
pub struct MockFileSystem {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
    root: PathBuf,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/mock"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) {
        let path = self.normalize_path(path.as_ref());
        self.files
            .write()
            .unwrap()
            .insert(path, content.as_bytes().to_vec());
    }

    pub fn add_binary(&self, path: impl AsRef<Path>, content: &[u8]) {
        let path = self.normalize_path(path.as_ref());
        self.files.write().unwrap().insert(path, content.to_vec());
    }

    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        )
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        let files = self.files.read().unwrap();
        files.contains_key(&path) || files.keys().any(|f| f.starts_with(&path))
    }

    fn is_file(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.files.read().unwrap().contains_key(&path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let path = self.normalize_path(path);
        self.files
            .read()
            .unwrap()
            .get(&path)
            .cloned()
            .ok_or_else(|| Self::not_found(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file() {
        let fs = MockFileSystem::new();
        fs.add_file("test.circom", "template A() {}");

        assert!(fs.exists(Path::new("/mock/test.circom")));
        assert!(fs.is_file(Path::new("/mock/test.circom")));
    }

    #[test]
    fn test_directories_exist_implicitly() {
        let fs = MockFileSystem::new();
        fs.add_file("a/b/c/file.circom", "content");

        assert!(fs.exists(Path::new("/mock/a/b")));
        assert!(!fs.is_file(Path::new("/mock/a/b")));
        assert!(fs.is_file(Path::new("/mock/a/b/c/file.circom")));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let fs = MockFileSystem::new();
        let err = fs.read_to_string(Path::new("/mock/none.circom")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_with_root() {
        let fs = MockFileSystem::with_root(PathBuf::from("/repo"));
        fs.add_file("circuits/main.circom", "component main = A();");

        let content = fs
            .read_to_string(Path::new("/repo/circuits/main.circom"))
            .unwrap();
        assert_eq!(content, "component main = A();");
    }

    #[test]
    fn test_binary_roundtrip() {
        let fs = MockFileSystem::new();
        fs.add_binary("key.zkey", &[0, 159, 146, 150]);
        assert_eq!(fs.read(Path::new("key.zkey")).unwrap(), vec![0, 159, 146, 150]);
        assert!(fs.read_to_string(Path::new("key.zkey")).is_err());
    }
}
