//! Remote build orchestration: submission, status log, instances

pub mod envelope;
pub mod history;
pub mod instance;
pub mod mock;
pub mod orchestrator;
pub mod status;
pub mod submitter;
pub mod transport;

pub use envelope::{JobResult, RemoteResponse};
pub use history::RequestHistory;
pub use instance::{InstanceHandle, InstanceLifecycleManager, InstanceSettings, InstanceSize, InstanceState};
pub use mock::{MockReply, MockTransport};
pub use orchestrator::{BuildOrchestrator, BuildOutcome, Endpoints, OrchestratorSettings};
pub use status::{PollSettings, PollState, StatusEntry, StatusLogPoller};
pub use submitter::{BuildJob, JobSubmitter, SubmitOutcome};
pub use transport::{HttpResponse, HttpTransport, RetryPolicy, Transport, TransportError};
