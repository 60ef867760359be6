//! Progress reporting for bundling and remote builds

mod handler;
mod logging;
mod render;

pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
pub use render::{ConsoleRenderer, RecordingRenderer, StatusRenderer};
