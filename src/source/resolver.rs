//! Include-graph resolution and path shortening

use super::marker::{MarkerConfig, MARKER_FILE_NAME};
use super::parser::{self, MainDeclaration};
use super::search::{find_closest_file, normalize};
use crate::error::BuildError;
use crate::fs::FileSystem;
use indexmap::IndexMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Conventional third-party library root, beneath the project root
const LIBRARY_ROOT: &str = "node_modules";
/// Vendored circuit library, beneath the library root
const VENDORED_CIRCUITS: &str = "circomlib/circuits";

/// One resolved source file
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    /// Include string as written by the first file that pulled this one in
    pub logical_path: String,
    /// Location actually read
    pub resolved_path: PathBuf,
    pub raw_content: String,
    /// Comment-free copy, used only for parsing
    pub stripped_content: String,
    /// Only ever set on the entry file
    pub main_declaration: Option<MainDeclaration>,
    /// Include literal -> key of the node it resolves to (a resolved path during
    /// resolution, a short path in a finished bundle)
    pub includes: IndexMap<String, String>,
}

/// Deduplicated, path-shortened set of sources. The entry file is always first.
#[derive(Debug, Clone)]
pub struct SourceBundle {
    pub config: Option<MarkerConfig>,
    pub config_path: Option<PathBuf>,
    pub files: IndexMap<String, SourceNode>,
}

impl SourceBundle {
    /// Short key and node of the entry file
    pub fn entry(&self) -> Option<(&String, &SourceNode)> {
        self.files.first()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Loads an entry file and everything it transitively includes.
pub struct SourceResolver {
    fs: Arc<dyn FileSystem>,
}

impl SourceResolver {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    pub fn resolve(&self, entry_file: &Path) -> Result<SourceBundle, BuildError> {
        let start = Instant::now();
        let entry = if entry_file.is_absolute() {
            normalize(entry_file)
        } else {
            normalize(&std::env::current_dir()?.join(entry_file))
        };
        let entry_dir = entry.parent().unwrap_or(Path::new("/")).to_path_buf();

        let (config, config_path, root_dir) =
            match find_closest_file(self.fs.as_ref(), &entry_dir, MARKER_FILE_NAME) {
                Some(path) => {
                    let config = MarkerConfig::load(self.fs.as_ref(), &path)?;
                    let root = path.parent().unwrap_or(Path::new("/")).to_path_buf();
                    debug!(config = %path.display(), extra = ?config.include, "Using marker config");
                    (Some(config), Some(path), root)
                }
                None => (None, None, entry_dir),
            };

        let mut run = ResolveRun {
            fs: self.fs.as_ref(),
            root_dir,
            extra_locations: config
                .as_ref()
                .map(|c| c.include.clone())
                .unwrap_or_default(),
            nodes: IndexMap::new(),
            stack: Vec::new(),
        };
        let entry_key = entry.to_string_lossy().into_owned();
        run.load(&entry_key, None)?;

        let files = shorten_paths(run.nodes);
        info!(
            files = files.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Resolved circuit sources"
        );

        Ok(SourceBundle {
            config,
            config_path,
            files,
        })
    }
}

/// State of one resolution run: an arena keyed by resolved path plus the chain of
/// files currently being expanded.
struct ResolveRun<'a> {
    fs: &'a dyn FileSystem,
    root_dir: PathBuf,
    extra_locations: Vec<String>,
    nodes: IndexMap<String, SourceNode>,
    stack: Vec<String>,
}

impl ResolveRun<'_> {
    /// Loads `include` (as written in `parent`) and returns its resolved key.
    fn load(&mut self, include: &str, parent: Option<&Path>) -> Result<String, BuildError> {
        let mut tried = Vec::new();

        for candidate in self.candidates(include, parent) {
            tried.push(candidate.clone());
            let key = candidate.to_string_lossy().into_owned();

            if self.stack.contains(&key) {
                let mut chain = self.stack.clone();
                chain.push(key);
                return Err(BuildError::CircularInclude {
                    include: include.to_string(),
                    chain,
                });
            }
            if self.nodes.contains_key(&key) {
                return Ok(key);
            }
            if !self.fs.is_file(&candidate) {
                continue;
            }
            let raw_content = match self.fs.read_to_string(&candidate) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            debug!(file = %candidate.display(), include, "Loaded source");
            self.expand(include, parent.is_none(), candidate, key.clone(), raw_content)?;
            return Ok(key);
        }

        Err(BuildError::NotFound {
            include: include.to_string(),
            parent: parent.map(Path::to_path_buf),
            tried,
            extra_locations: self.extra_locations.clone(),
        })
    }

    fn expand(
        &mut self,
        include: &str,
        is_entry: bool,
        path: PathBuf,
        key: String,
        raw_content: String,
    ) -> Result<(), BuildError> {
        let stripped_content = parser::strip_comments(&raw_content);
        let imported = parser::extract_includes(&stripped_content);
        let main_declaration = if is_entry {
            parser::parse_main_declaration(&stripped_content)
        } else {
            None
        };

        self.nodes.insert(
            key.clone(),
            SourceNode {
                logical_path: include.to_string(),
                resolved_path: path.clone(),
                raw_content,
                stripped_content,
                main_declaration,
                includes: IndexMap::new(),
            },
        );

        self.stack.push(key.clone());
        let mut includes = IndexMap::new();
        for child in imported {
            let target = self.load(&child, Some(&path))?;
            includes.insert(child, target);
        }
        self.stack.pop();

        if let Some(node) = self.nodes.get_mut(&key) {
            node.includes = includes;
        }
        Ok(())
    }

    /// Search order: parent's directory, marker `include` roots, the project root,
    /// the library root, then the vendored circuit library. Duplicates are skipped.
    fn candidates(&self, include: &str, parent: Option<&Path>) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |path: PathBuf| {
            let path = normalize(&path);
            if !out.contains(&path) {
                out.push(path);
            }
        };

        match parent {
            Some(parent) => push(parent.parent().unwrap_or(Path::new("/")).join(include)),
            None => push(PathBuf::from(include)),
        }
        for extra in &self.extra_locations {
            push(self.root_dir.join(extra).join(include));
        }
        push(self.root_dir.join(include));
        push(self.root_dir.join(LIBRARY_ROOT).join(include));
        push(
            self.root_dir
                .join(LIBRARY_ROOT)
                .join(VENDORED_CIRCUITS)
                .join(include),
        );
        out
    }
}

/// Re-keys every node (and every include target) by stripping the longest common
/// directory prefix of all resolved paths. A lone file is keyed by its file name.
pub fn shorten_paths(nodes: IndexMap<String, SourceNode>) -> IndexMap<String, SourceNode> {
    if nodes.len() == 1 {
        return nodes
            .into_iter()
            .map(|(key, node)| {
                let short = node
                    .resolved_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(key);
                (short, node)
            })
            .collect();
    }

    let keys: Vec<&str> = nodes.keys().map(String::as_str).collect();
    let prefix_len = common_directory_prefix(&keys).len();

    nodes
        .into_iter()
        .map(|(key, mut node)| {
            for target in node.includes.values_mut() {
                *target = target[prefix_len..].to_string();
            }
            (key[prefix_len..].to_string(), node)
        })
        .collect()
}

/// Longest common prefix of `paths`, cut back to the last separator so no file or
/// directory name is split.
pub fn common_directory_prefix<'a>(paths: &[&'a str]) -> &'a str {
    let Some(first) = paths.first() else {
        return "";
    };
    let mut len = first.len();
    for path in &paths[1..] {
        len = first
            .bytes()
            .zip(path.bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count();
    }
    while !first.is_char_boundary(len) {
        len -= 1;
    }
    let candidate = &first[..len];
    match candidate.rfind(MAIN_SEPARATOR) {
        Some(idx) => &first[..=idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn resolver(fs: MockFileSystem) -> SourceResolver {
        SourceResolver::new(Arc::new(fs))
    }

    #[test]
    fn test_single_file_keyed_by_base_name() {
        let fs = MockFileSystem::new();
        fs.add_file("/work/circuits/main.circom", "component main = A();");

        let bundle = resolver(fs)
            .resolve(Path::new("/work/circuits/main.circom"))
            .unwrap();
        assert_eq!(bundle.len(), 1);
        let (key, node) = bundle.entry().unwrap();
        assert_eq!(key, "main.circom");
        assert_eq!(node.main_declaration.as_ref().unwrap().template_name, "A");
    }

    #[test]
    fn test_shared_include_loaded_once() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/w/main.circom",
            r#"include "a.circom"; include "b.circom"; component main = M();"#,
        );
        fs.add_file("/w/a.circom", r#"include "common.circom";"#);
        fs.add_file("/w/b.circom", r#"include "./common.circom";"#);
        fs.add_file("/w/common.circom", "template C() {}");

        let bundle = resolver(fs).resolve(Path::new("/w/main.circom")).unwrap();
        let keys: Vec<&str> = bundle.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["main.circom", "a.circom", "common.circom", "b.circom"]);
        assert_eq!(bundle.files["a.circom"].includes["common.circom"], "common.circom");
        assert_eq!(bundle.files["b.circom"].includes["./common.circom"], "common.circom");
    }

    #[test]
    fn test_main_declaration_only_on_entry() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/main.circom", r#"include "lib.circom"; component main = A();"#);
        fs.add_file("/w/lib.circom", "component main = Test();");

        let bundle = resolver(fs).resolve(Path::new("/w/main.circom")).unwrap();
        assert!(bundle.files["main.circom"].main_declaration.is_some());
        assert!(bundle.files["lib.circom"].main_declaration.is_none());
    }

    #[test]
    fn test_self_include_fails_as_not_found_class() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/main.circom", r#"include "main.circom";"#);

        let err = resolver(fs).resolve(Path::new("/w/main.circom")).unwrap_err();
        assert!(matches!(err, BuildError::CircularInclude { .. }));
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_longer_cycle_is_detected() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/main.circom", r#"include "a.circom";"#);
        fs.add_file("/w/a.circom", r#"include "b.circom";"#);
        fs.add_file("/w/b.circom", r#"include "a.circom";"#);

        match resolver(fs).resolve(Path::new("/w/main.circom")) {
            Err(BuildError::CircularInclude { chain, .. }) => {
                assert_eq!(chain.len(), 4);
                assert!(chain[3].ends_with("a.circom"));
            }
            other => panic!("expected circular include, got {:?}", other),
        }
    }

    #[test]
    fn test_library_fallbacks() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/w/src/main.circom",
            r#"include "poseidon.circom"; include "mylib/x.circom"; component main = A();"#,
        );
        fs.add_file("/w/src/node_modules/circomlib/circuits/poseidon.circom", "");
        fs.add_file("/w/src/node_modules/mylib/x.circom", "");

        let bundle = resolver(fs).resolve(Path::new("/w/src/main.circom")).unwrap();
        let keys: Vec<&str> = bundle.files.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "main.circom",
                "node_modules/circomlib/circuits/poseidon.circom",
                "node_modules/mylib/x.circom"
            ]
        );
    }

    #[test]
    fn test_not_found_lists_attempts_in_order() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/main.circom", r#"include "missing.circom";"#);

        match resolver(fs).resolve(Path::new("/w/main.circom")) {
            Err(BuildError::NotFound { include, tried, parent, .. }) => {
                assert_eq!(include, "missing.circom");
                assert_eq!(parent, Some(PathBuf::from("/w/main.circom")));
                assert_eq!(
                    tried,
                    vec![
                        PathBuf::from("/w/missing.circom"),
                        PathBuf::from("/w/node_modules/missing.circom"),
                        PathBuf::from("/w/node_modules/circomlib/circuits/missing.circom"),
                    ]
                );
            }
            other => panic!("expected NOT_FOUND, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_marker_config() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/circomkit.json", "include: lib");
        fs.add_file("/w/main.circom", "component main = A();");

        let err = resolver(fs).resolve(Path::new("/w/main.circom")).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_shorten_paths_strips_directory_prefix() {
        let mut nodes = IndexMap::new();
        let mut a_includes = IndexMap::new();
        a_includes.insert("z/b.src".to_string(), "/x/y/z/b.src".to_string());
        nodes.insert("/x/y/a.src".to_string(), node("/x/y/a.src", a_includes));
        nodes.insert("/x/y/z/b.src".to_string(), node("/x/y/z/b.src", IndexMap::new()));

        let short = shorten_paths(nodes);
        let keys: Vec<&str> = short.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a.src", "z/b.src"]);
        assert_eq!(short["a.src"].includes["z/b.src"], "z/b.src");
    }

    #[test]
    fn test_common_directory_prefix_does_not_split_names() {
        assert_eq!(
            common_directory_prefix(&["/x/y/abc.circom", "/x/y/abd.circom"]),
            "/x/y/"
        );
        assert_eq!(common_directory_prefix(&["/a/b.c", "/x/y.c"]), "/");
        assert_eq!(common_directory_prefix(&[]), "");
    }

    #[test]
    fn test_common_directory_prefix_with_multibyte_names() {
        // é and ê share their first UTF-8 byte
        assert_eq!(common_directory_prefix(&["/x/é.c", "/x/ê.c"]), "/x/");
        assert_eq!(
            common_directory_prefix(&["/w/é/main.circom", "/w/ê/b.circom"]),
            "/w/"
        );
    }

    #[test]
    fn test_resolve_sibling_multibyte_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("/w/é/main.circom", "include \"../ê/b.circom\";\ncomponent main = B();\n");
        fs.add_file("/w/ê/b.circom", "template B() {}\n");

        let bundle = resolver(fs).resolve(Path::new("/w/é/main.circom")).unwrap();
        let keys: Vec<&str> = bundle.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["é/main.circom", "ê/b.circom"]);
    }

    fn node(path: &str, includes: IndexMap<String, String>) -> SourceNode {
        SourceNode {
            logical_path: path.to_string(),
            resolved_path: PathBuf::from(path),
            raw_content: String::new(),
            stripped_content: String::new(),
            main_declaration: None,
            includes,
        }
    }
}
