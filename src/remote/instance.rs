//! Dedicated instance lifecycle
//!
//! `None -> Starting -> Booting -> Ready -> InUse -> Terminating -> Gone`, with
//! `Failed` absorbing. Once an instance has been started, [`InstanceLifecycleManager::terminate`]
//! issues the stop request at most once no matter how many exit paths call it.

use super::envelope::{self, RemoteResponse};
use super::transport::{ensure_success, with_retry, RetryPolicy, Transport, TransportError};
use crate::error::BuildError;
use crate::progress::{ProgressEvent, ProgressHandler};
use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Supported sizes: memory in GB and the provider instance type
const INSTANCE_SIZES: [(u32, &str); 9] = [
    (4, "t3.medium"),
    (8, "t3.large"),
    (16, "r7i.large"),
    (32, "r7i.xlarge"),
    (64, "r7i.2xlarge"),
    (128, "r7i.4xlarge"),
    (256, "r7i.8xlarge"),
    (384, "r7i.12xlarge"),
    (512, "r7i.16xlarge"),
];

pub const CREATE_IN_PROGRESS: &str = "CREATE_IN_PROGRESS";
pub const CREATE_COMPLETE: &str = "CREATE_COMPLETE";
/// Verbatim reply of the provisioning service to a stop request
pub const STOP_CONFIRMATION: &str = "Instance termination requested.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSize {
    pub memory_gb: u32,
    pub instance_type: &'static str,
}

impl InstanceSize {
    pub fn parse(requested: &str) -> Result<Self, BuildError> {
        let gb: Option<u32> = requested.trim().parse().ok();
        INSTANCE_SIZES
            .iter()
            .find(|(size, _)| Some(*size) == gb)
            .map(|&(memory_gb, instance_type)| InstanceSize {
                memory_gb,
                instance_type,
            })
            .ok_or_else(|| BuildError::InvalidInstanceSize {
                requested: requested.to_string(),
                supported: Self::supported(),
            })
    }

    pub fn supported() -> Vec<String> {
        INSTANCE_SIZES.iter().map(|(gb, _)| gb.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    None,
    Starting,
    Booting,
    Ready,
    InUse,
    Terminating,
    Gone,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::None => "NONE",
            InstanceState::Starting => "STARTING",
            InstanceState::Booting => "BOOTING",
            InstanceState::Ready => "READY",
            InstanceState::InUse => "IN_USE",
            InstanceState::Terminating => "TERMINATING",
            InstanceState::Gone => "GONE",
            InstanceState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub stack_id: String,
    pub public_host: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub boot_poll: Duration,
    pub boot_timeout: Duration,
    pub ready_poll: Duration,
    pub ready_timeout: Duration,
    /// Pause between watchdog probes while the job runs
    pub health_interval: Duration,
    /// A probe slower than this marks the instance as hung
    pub health_timeout: Duration,
    pub port: u16,
    pub retry: RetryPolicy,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            boot_poll: Duration::from_secs(5),
            boot_timeout: Duration::from_secs(20 * 60),
            ready_poll: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(10 * 60),
            health_interval: Duration::from_secs(8),
            health_timeout: Duration::from_secs(7),
            port: 3000,
            retry: RetryPolicy::default(),
        }
    }
}

fn stack_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"stack/([^/]+)").expect("valid regex"))
}

/// Stack token embedded in a provisioning identifier such as
/// `arn:...:stack/circuit-abc/1234`; identifiers without one are used whole.
pub fn extract_stack_id(identifier: &str) -> String {
    stack_re()
        .captures(identifier)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| identifier.trim().to_string())
}

pub struct InstanceLifecycleManager {
    transport: Arc<dyn Transport>,
    provisioner_url: String,
    blob_base: String,
    api_key: String,
    request_id: String,
    settings: InstanceSettings,
    progress: Arc<dyn ProgressHandler>,
    state: Mutex<InstanceState>,
    handle: Option<InstanceHandle>,
    terminated: AtomicBool,
}

impl InstanceLifecycleManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        provisioner_url: impl Into<String>,
        blob_base: impl Into<String>,
        api_key: impl Into<String>,
        request_id: impl Into<String>,
        settings: InstanceSettings,
        progress: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            transport,
            provisioner_url: provisioner_url.into(),
            blob_base: blob_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_id: request_id.into(),
            settings,
            progress,
            state: Mutex::new(InstanceState::None),
            handle: None,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock().unwrap()
    }

    pub fn handle(&self) -> Option<&InstanceHandle> {
        self.handle.as_ref()
    }

    fn transition(&self, next: InstanceState) {
        let mut state = self.state.lock().unwrap();
        if *state == InstanceState::Failed || *state == next {
            return;
        }
        debug!(request_id = %self.request_id, from = %*state, to = %next, "Instance transition");
        *state = next;
        drop(state);
        self.progress.on_progress(&ProgressEvent::InstanceState {
            request_id: self.request_id.clone(),
            state: next.to_string(),
        });
    }

    async fn provisioner_call(
        &self,
        retry: &RetryPolicy,
        action: &str,
        params: Value,
    ) -> Result<RemoteResponse, BuildError> {
        call_provisioner(
            self.transport.as_ref(),
            retry,
            &self.provisioner_url,
            &self.api_key,
            action,
            params,
        )
        .await
    }

    /// Requests a new instance of `size` and records its stack id.
    pub async fn start(&mut self, size: InstanceSize) -> Result<&InstanceHandle, BuildError> {
        self.transition(InstanceState::Starting);
        info!(
            request_id = %self.request_id,
            instance_type = size.instance_type,
            memory_gb = size.memory_gb,
            "Starting instance"
        );

        let params = json!({
            "requestId": self.request_id,
            "instanceType": size.instance_type,
        });
        // a retried start after a timeout could provision a second instance
        let response = match self.provisioner_call(&RetryPolicy::none(), "start", params).await {
            Ok(response) => response,
            Err(e) => {
                self.transition(InstanceState::Failed);
                return Err(BuildError::InstanceProvisionFailed(e.to_string()));
            }
        };

        let identifier = match &response.body {
            Value::String(s) => Some(s.clone()),
            other => other
                .get("stackId")
                .or_else(|| other.get("StackId"))
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let Some(identifier) = identifier.filter(|s| !s.trim().is_empty()) else {
            self.transition(InstanceState::Failed);
            return Err(BuildError::InstanceProvisionFailed(format!(
                "no instance identifier in start response: {}",
                response.body
            )));
        };

        let handle = self.handle.insert(InstanceHandle {
            stack_id: extract_stack_id(&identifier),
            public_host: None,
        });
        debug!(stack_id = %handle.stack_id, "Instance requested");
        Ok(&*handle)
    }

    /// Polls provisioning status until the stack is up and returns its public host.
    pub async fn wait_until_booted(&mut self) -> Result<String, BuildError> {
        let stack_id = match &self.handle {
            Some(handle) => handle.stack_id.clone(),
            None => {
                return Err(BuildError::InstanceProvisionFailed(
                    "instance was never started".to_string(),
                ))
            }
        };
        self.transition(InstanceState::Booting);
        let deadline = Instant::now() + self.settings.boot_timeout;

        let mut host = loop {
            let params = json!({ "stackId": stack_id, "requestId": self.request_id });
            let response = match self.provisioner_call(&self.settings.retry, "status", params).await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e.to_string())),
            };
            match response.status.as_deref() {
                Some(CREATE_IN_PROGRESS) => {}
                Some(CREATE_COMPLETE) => {
                    break response
                        .body
                        .get("publicHost")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                other => {
                    return Err(self.fail(format!(
                        "stack {} reported status {}",
                        stack_id,
                        other.unwrap_or("<none>")
                    )))
                }
            }
            if Instant::now() >= deadline {
                return Err(self.fail(format!(
                    "stack {} did not finish booting within {}s",
                    stack_id,
                    self.settings.boot_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.settings.boot_poll).await;
        };

        while host.is_none() {
            host = self.fetch_ip_artifact().await?;
            if host.is_none() {
                if Instant::now() >= deadline {
                    return Err(self.fail("instance never published its address".to_string()));
                }
                tokio::time::sleep(self.settings.boot_poll).await;
            }
        }
        let host = host.unwrap_or_default();

        info!(request_id = %self.request_id, host = %host, "Instance running");
        if let Some(handle) = self.handle.as_mut() {
            handle.public_host = Some(host.clone());
        }
        Ok(host)
    }

    async fn fetch_ip_artifact(&self) -> Result<Option<String>, BuildError> {
        let url = format!(
            "{}/instance/{}/ip.txt",
            self.blob_base.trim_end_matches('/'),
            self.request_id
        );
        let response = with_retry(&self.settings.retry, "instance address", || self.transport.get(&url)).await?;
        if response.is_missing() {
            return Ok(None);
        }
        let response = ensure_success(&url, response)?;
        let ip = response.body.trim();
        Ok((!ip.is_empty()).then(|| ip.to_string()))
    }

    fn fail(&self, message: String) -> BuildError {
        warn!(request_id = %self.request_id, error = %message, "Instance failed");
        self.transition(InstanceState::Failed);
        BuildError::InstanceProvisionFailed(message)
    }

    fn health_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.settings.port)
    }

    /// Probes the instance until it answers. DNS failures mean the name has not
    /// propagated yet; any other connection error is fatal.
    pub async fn wait_until_ready(&self, host: &str) -> Result<(), BuildError> {
        let url = self.health_url(host);
        let deadline = Instant::now() + self.settings.ready_timeout;

        loop {
            match tokio::time::timeout(self.settings.health_timeout, self.transport.get(&url)).await {
                Ok(Ok(_)) => break,
                Ok(Err(TransportError::Dns(e))) => {
                    debug!(host, error = %e, "Instance address not resolvable yet");
                }
                Ok(Err(TransportError::Timeout(_))) | Err(_) => {
                    return Err(self.unresponsive().await);
                }
                Ok(Err(e)) => return Err(self.fail(format!("instance unreachable: {}", e))),
            }
            if Instant::now() >= deadline {
                return Err(self.unresponsive().await);
            }
            tokio::time::sleep(self.settings.ready_poll).await;
        }

        self.transition(InstanceState::Ready);
        Ok(())
    }

    /// Runs `work` while a watchdog re-probes the instance. A probe that fails or
    /// exceeds the health timeout terminates the instance and aborts `work`.
    pub async fn supervise<T, F>(&self, host: &str, work: F) -> Result<T, BuildError>
    where
        F: Future<Output = Result<T, BuildError>>,
    {
        self.transition(InstanceState::InUse);
        tokio::select! {
            result = work => result,
            error = self.watchdog(host) => Err(error),
        }
    }

    async fn watchdog(&self, host: &str) -> BuildError {
        let url = self.health_url(host);
        loop {
            tokio::time::sleep(self.settings.health_interval).await;
            match tokio::time::timeout(self.settings.health_timeout, self.transport.get(&url)).await {
                Ok(Ok(_)) => debug!(host, "Instance healthy"),
                Ok(Err(e)) => {
                    warn!(host, error = %e, "Instance health check failed");
                    return self.unresponsive().await;
                }
                Err(_) => {
                    warn!(
                        host,
                        timeout_ms = self.settings.health_timeout.as_millis() as u64,
                        "Instance health check timed out"
                    );
                    return self.unresponsive().await;
                }
            }
        }
    }

    async fn unresponsive(&self) -> BuildError {
        if let Err(e) = self.terminate().await {
            warn!(request_id = %self.request_id, error = %e, "Termination after failed health check did not succeed");
        }
        self.transition(InstanceState::Failed);
        BuildError::InstanceUnresponsive {
            request_id: self.request_id.clone(),
            timeout_secs: self.settings.health_timeout.as_secs(),
        }
    }

    /// Stops the instance. Only the first call sends a request; later calls and
    /// calls before any instance was started are no-ops.
    pub async fn terminate(&self) -> Result<(), BuildError> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transition(InstanceState::Terminating);
        info!(request_id = %self.request_id, stack_id = %handle.stack_id, "Terminating instance");
        stop_instance(
            self.transport.as_ref(),
            &self.settings.retry,
            &self.provisioner_url,
            &self.api_key,
            &self.request_id,
            Some(&handle.stack_id),
        )
        .await?;
        self.transition(InstanceState::Gone);
        Ok(())
    }
}

async fn call_provisioner(
    transport: &dyn Transport,
    retry: &RetryPolicy,
    url: &str,
    api_key: &str,
    action: &str,
    params: Value,
) -> Result<RemoteResponse, BuildError> {
    let body = json!({ "action": action, "apiKey": api_key, "params": params });
    let response = with_retry(retry, action, || transport.post_json(url, &body)).await?;
    let response = ensure_success(url, response)?;
    envelope::normalize(response.parse_json()?)?.into_result()
}

/// Asks the provisioning service to stop the instance serving `request_id`. The
/// reply must be the verbatim confirmation message.
pub async fn stop_instance(
    transport: &dyn Transport,
    retry: &RetryPolicy,
    provisioner_url: &str,
    api_key: &str,
    request_id: &str,
    stack_id: Option<&str>,
) -> Result<(), BuildError> {
    let mut params = json!({ "requestId": request_id });
    if let Some(stack_id) = stack_id {
        params["stackId"] = json!(stack_id);
    }

    let response = call_provisioner(transport, retry, provisioner_url, api_key, "stop", params)
        .await
        .map_err(|e| BuildError::TerminationFailed(e.to_string()))?;

    match response.body.as_str() {
        Some(STOP_CONFIRMATION) => Ok(()),
        _ => Err(BuildError::TerminationFailed(format!(
            "unexpected confirmation: {}",
            response.body
        ))),
    }
}
