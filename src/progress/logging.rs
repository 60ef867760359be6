//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ResolveStarted { entry } => {
                debug!(entry = %entry, "Resolving sources");
            }
            ProgressEvent::FilesResolved { count, elapsed } => {
                info!(
                    files = count,
                    elapsed_ms = elapsed.as_millis(),
                    "Sources resolved"
                );
            }
            ProgressEvent::RequestCreated { request_id } => {
                info!(request_id = %request_id, "Request created");
            }
            ProgressEvent::InstanceState { request_id, state } => {
                info!(request_id = %request_id, state = %state, "Instance state changed");
            }
            ProgressEvent::Submitted {
                request_id,
                endpoint,
            } => {
                debug!(request_id = %request_id, endpoint = %endpoint, "Payload submitted");
            }
            ProgressEvent::Completed {
                request_id,
                pkg_name,
                total_time,
            } => {
                info!(
                    request_id = %request_id,
                    pkg_name = pkg_name.as_deref().unwrap_or("-"),
                    total_time_ms = total_time.as_millis(),
                    "Build completed"
                );
            }
            ProgressEvent::Failed { request_id, error } => {
                error!(request_id = %request_id, error = %error, "Build failed");
            }
        }
    }
}
