//! circuitpack - bundle multi-file circuit sources and build them remotely
//!
//! A circuit is usually spread over many files that pull each other in with
//! `include` directives. This library resolves the full include graph of an entry
//! file, strips the local directory layout from it, and assembles a single build
//! payload. It then drives the remote build: submission, status log polling, and
//! the lifecycle of a dedicated build instance when one is requested.
//!
//! # Example Usage
//!
//! ```no_run
//! use circuitpack::fs::RealFileSystem;
//! use circuitpack::payload::{BuildOptions, PayloadBuilder};
//! use circuitpack::source::SourceResolver;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), circuitpack::BuildError> {
//! let fs = Arc::new(RealFileSystem::new());
//! let bundle = SourceResolver::new(fs.clone()).resolve(Path::new("circuits/main.circom"))?;
//! let payload = PayloadBuilder::new(fs, "circom-v2.1.8").build(&bundle, &BuildOptions::default())?;
//! println!("{} files", payload.files.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`source`]: include resolution, comment stripping and path shortening
//! - [`payload`]: build payload assembly and option precedence
//! - [`remote`]: transport, submission, status polling and instance lifecycle
//! - [`progress`]: progress events and status log rendering
//! - [`config`]: environment, service map and per-user settings

pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod payload;
pub mod progress;
pub mod remote;
pub mod source;
pub mod util;

pub use config::{CircuitpackConfig, ConfigError, RemoteConfig, UserConfig};
pub use error::BuildError;
pub use payload::{BuildOptions, Payload, PayloadBuilder};
pub use remote::{BuildOrchestrator, BuildOutcome, Endpoints, InstanceSize};
pub use source::{SourceBundle, SourceResolver};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
