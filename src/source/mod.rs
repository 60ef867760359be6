//! Circuit source discovery: include resolution, marker config and parsing

pub mod marker;
pub mod parser;
pub mod resolver;
pub mod search;

pub use marker::{MarkerConfig, MARKER_FILE_NAME};
pub use parser::MainDeclaration;
pub use resolver::{SourceBundle, SourceNode, SourceResolver};
