//! Job submission to the remote compiler

use super::envelope::{self, JobResult};
use super::history::RequestHistory;
use super::transport::{ensure_success, with_retry, RetryPolicy, Transport};
use crate::error::BuildError;
use crate::payload::Payload;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

pub const REQUEST_ID_LENGTH: usize = 40;

pub fn generate_request_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// One submission. Immutable once sent; identified afterwards only by `request_id`.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub request_id: String,
    pub payload: Payload,
    /// Provider instance type, when the job runs on a dedicated instance
    pub instance_type: Option<String>,
    pub submitted_at: SystemTime,
}

impl BuildJob {
    /// Wire document: `{apiKey, payload: {...payload, requestId, instanceType}}`
    pub fn envelope(&self, api_key: &str) -> Result<Value, BuildError> {
        let mut payload = serde_json::to_value(&self.payload)
            .map_err(|e| BuildError::InvalidResponse(format!("cannot encode payload: {}", e)))?;
        if let Value::Object(map) = &mut payload {
            map.insert("requestId".to_string(), json!(self.request_id));
            if let Some(instance_type) = &self.instance_type {
                map.insert("instanceType".to_string(), json!(instance_type));
            }
        }
        Ok(json!({ "apiKey": api_key, "payload": payload }))
    }
}

/// How the compiler answered a submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The compiler finished synchronously
    Completed(JobResult),
    /// Accepted for a dedicated instance; the result arrives via the instance's
    /// result artifact
    Deferred,
}

pub struct JobSubmitter {
    transport: Arc<dyn Transport>,
    api_key: String,
    history: Option<RequestHistory>,
    retry: RetryPolicy,
}

impl JobSubmitter {
    pub fn new(transport: Arc<dyn Transport>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            history: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_history(mut self, history: Option<RequestHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Allocates a request id for `payload` and records it in the history file.
    pub fn prepare(&self, payload: Payload, instance_type: Option<String>) -> BuildJob {
        let request_id = generate_request_id();
        if let Some(history) = &self.history {
            history.append(&request_id);
        }
        info!(request_id = %request_id, "Created build request");
        BuildJob {
            request_id,
            payload,
            instance_type,
            submitted_at: SystemTime::now(),
        }
    }

    pub async fn submit(&self, endpoint: &str, job: &BuildJob) -> Result<SubmitOutcome, BuildError> {
        let body = job.envelope(&self.api_key)?;
        debug!(request_id = %job.request_id, endpoint, "Submitting build");

        let response = with_retry(&self.retry, "submit", || self.transport.post_json(endpoint, &body)).await?;
        let response = ensure_success(endpoint, response)?;
        let normalized = envelope::normalize(response.parse_json()?)?.into_result()?;

        if normalized.is_ok() && job.instance_type.is_some() {
            debug!(request_id = %job.request_id, "Submission deferred to instance");
            return Ok(SubmitOutcome::Deferred);
        }
        Ok(SubmitOutcome::Completed(JobResult::from_response(&normalized)))
    }
}

/// Compiler endpoint for a submission: the local override first, then the
/// dedicated instance, then the shared remote compiler.
pub fn compiler_endpoint(local_override: Option<&str>, instance_host: Option<&str>, default_url: &str, port: u16) -> String {
    if let Some(url) = local_override {
        return url.to_string();
    }
    if let Some(host) = instance_host {
        return format!("http://{}:{}", host, port);
    }
    default_url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CircuitDescriptor, Payload};
    use crate::remote::mock::{MockReply, MockTransport};
    use crate::remote::transport::{HttpResponse, TransportError};
    use indexmap::IndexMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn payload() -> Payload {
        Payload {
            pipeline: "circom".to_string(),
            files: IndexMap::new(),
            final_zkey: None,
            snarkjs_version: None,
            circom_path: "circom-v2.1.8".to_string(),
            optimization: None,
            protocol: "groth16".to_string(),
            ptau_size: None,
            prime: "bn128".to_string(),
            circuit: CircuitDescriptor {
                file: "main".to_string(),
                version: "2.1.8".to_string(),
                template: "Main".to_string(),
                params: vec![],
                pubs: vec![],
            },
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_request_id_shape() {
        let id = generate_request_id();
        assert_eq!(id.len(), REQUEST_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_request_id());
    }

    #[test]
    fn test_prepare_records_history() {
        let dir = TempDir::new().unwrap();
        let history = RequestHistory::new(dir.path().join("h"));
        let submitter = JobSubmitter::new(Arc::new(MockTransport::new()), "key")
            .with_history(Some(history.clone()));

        let job = submitter.prepare(payload(), None);
        let content = std::fs::read_to_string(history.path()).unwrap();
        assert_eq!(content, format!("{}\n", job.request_id));
    }

    #[test]
    fn test_envelope_shape() {
        let submitter = JobSubmitter::new(Arc::new(MockTransport::new()), "key");
        let job = submitter.prepare(payload(), Some("t3.large".to_string()));
        let envelope = job.envelope("key").unwrap();

        assert_eq!(envelope["apiKey"], "key");
        assert_eq!(envelope["payload"]["requestId"], job.request_id.as_str());
        assert_eq!(envelope["payload"]["instanceType"], "t3.large");
        assert_eq!(envelope["payload"]["circuit"]["template"], "Main");
    }

    #[tokio::test]
    async fn test_synchronous_completion() {
        let transport = Arc::new(MockTransport::new());
        transport.add_json("http://c", json!({"body": "{\"status\":\"ok\",\"pkgName\":\"pkg1\"}"}));
        let submitter = JobSubmitter::new(transport.clone(), "key");
        let job = submitter.prepare(payload(), None);

        match submitter.submit("http://c", &job).await.unwrap() {
            SubmitOutcome::Completed(result) => assert_eq!(result.pkg_name.as_deref(), Some("pkg1")),
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_when_instance_requested() {
        let transport = Arc::new(MockTransport::new());
        transport.add_json("http://c", json!({"status": "ok"}));
        let submitter = JobSubmitter::new(transport, "key");
        let job = submitter.prepare(payload(), Some("t3.medium".to_string()));

        assert_eq!(submitter.submit("http://c", &job).await.unwrap(), SubmitOutcome::Deferred);
    }

    #[tokio::test]
    async fn test_application_error_surfaced() {
        let transport = Arc::new(MockTransport::new());
        transport.add_json("http://c", json!({"errorType": "Error", "errorMessage": "bad circuit"}));
        let submitter = JobSubmitter::new(transport, "key");
        let job = submitter.prepare(payload(), None);

        let err = submitter.submit("http://c", &job).await.unwrap_err();
        assert_eq!(err.code(), "APPLICATION_ERROR");
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.add_replies(
            "http://c",
            [
                MockReply::Error(TransportError::Connect("reset".into())),
                MockReply::json(json!({"status": "ok"})),
            ],
        );
        let submitter = JobSubmitter::new(transport.clone(), "key").with_retry(fast_retry());
        let job = submitter.prepare(payload(), None);

        submitter.submit("http://c", &job).await.unwrap();
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.add_reply("http://c", MockReply::Response(HttpResponse::new(502, "gateway")));
        let submitter = JobSubmitter::new(transport.clone(), "key").with_retry(fast_retry());
        let job = submitter.prepare(payload(), None);

        let err = submitter.submit("http://c", &job).await.unwrap_err();
        assert_eq!(err.code(), "HTTP_ERROR");
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_endpoint_precedence() {
        assert_eq!(compiler_endpoint(Some("http://local"), Some("1.2.3.4"), "http://remote", 3000), "http://local");
        assert_eq!(compiler_endpoint(None, Some("1.2.3.4"), "http://remote", 3000), "http://1.2.3.4:3000");
        assert_eq!(compiler_endpoint(None, None, "http://remote", 3000), "http://remote");
    }
}
