//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a build moves through its stages
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Source resolution started
    ResolveStarted { entry: String },

    /// Bundle built
    FilesResolved { count: usize, elapsed: Duration },

    /// Request id allocated
    RequestCreated { request_id: String },

    /// Instance moved to a new lifecycle state
    InstanceState { request_id: String, state: String },

    /// Payload accepted by the compiler
    Submitted { request_id: String, endpoint: String },

    /// Build finished
    Completed {
        request_id: String,
        pkg_name: Option<String>,
        total_time: Duration,
    },

    /// Build failed
    Failed { request_id: String, error: String },
}

/// Trait for handling progress events
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
