//! End-to-end remote build flow
//!
//! `run` submits a payload and follows the job to a result; `resume` re-attaches to
//! an earlier request's status log without submitting anything.

use super::envelope::{self, JobResult};
use super::history::RequestHistory;
use super::instance::{self, InstanceLifecycleManager, InstanceSettings, InstanceSize};
use super::status::{find_package_name, PollSettings, PollState, StatusLogPoller};
use super::submitter::{compiler_endpoint, BuildJob, JobSubmitter, SubmitOutcome};
use super::transport::{ensure_success, with_retry, RetryPolicy, Transport};
use crate::error::BuildError;
use crate::payload::Payload;
use crate::progress::{ProgressEvent, ProgressHandler, StatusRenderer};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the remote services live
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Shared compiler used when no instance is requested
    pub compiler: String,
    /// Overrides every other compiler endpoint when set
    pub local_compiler: Option<String>,
    pub provisioner: String,
    pub blob_base: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll: PollSettings,
    pub instance: InstanceSettings,
    pub retry: RetryPolicy,
    /// How long to keep waiting for the result once the log reports completion
    pub completion_grace: Duration,
    /// Pause between result artifact fetches
    pub result_poll: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            instance: InstanceSettings::default(),
            retry: RetryPolicy::default(),
            completion_grace: Duration::from_secs(60),
            result_poll: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub request_id: String,
    pub pkg_name: Option<String>,
    /// `None` for resumed jobs, which only learn the package name
    pub result: Option<JobResult>,
}

enum Race<T> {
    Work(Result<T, BuildError>),
    Log(PollState),
}

pub struct BuildOrchestrator {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    api_key: String,
    settings: OrchestratorSettings,
    renderer: Arc<dyn StatusRenderer>,
    progress: Arc<dyn ProgressHandler>,
    history: Option<RequestHistory>,
    cancel: CancellationToken,
}

impl BuildOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        api_key: impl Into<String>,
        renderer: Arc<dyn StatusRenderer>,
        progress: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            transport,
            endpoints,
            api_key: api_key.into(),
            settings: OrchestratorSettings::default(),
            renderer,
            progress,
            history: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_history(mut self, history: Option<RequestHistory>) -> Self {
        self.history = history;
        self
    }

    /// Token that interrupts the current wait; cleanup still runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn poller(&self, request_id: &str) -> StatusLogPoller {
        StatusLogPoller::new(
            self.transport.clone(),
            self.renderer.clone(),
            &self.endpoints.blob_base,
            request_id,
        )
    }

    /// Submits `payload` and waits for its result. With an instance size the job
    /// runs on a dedicated instance that is always terminated before returning.
    pub async fn run(&self, payload: Payload, instance: Option<InstanceSize>) -> Result<BuildOutcome, BuildError> {
        let started = Instant::now();
        let submitter = JobSubmitter::new(self.transport.clone(), self.api_key.clone())
            .with_history(self.history.clone())
            .with_retry(self.settings.retry.clone());
        let job = submitter.prepare(payload, instance.map(|size| size.instance_type.to_string()));
        self.progress.on_progress(&ProgressEvent::RequestCreated {
            request_id: job.request_id.clone(),
        });
        self.renderer.line(&format!("# Request ID: {}", job.request_id));

        let mut poller = self.poller(&job.request_id);
        let result = match instance {
            None => {
                let endpoint = compiler_endpoint(
                    self.endpoints.local_compiler.as_deref(),
                    None,
                    &self.endpoints.compiler,
                    self.settings.instance.port,
                );
                self.race_with_log(&mut poller, &job.request_id, self.submit_and_collect(&submitter, &endpoint, &job))
                    .await
            }
            Some(size) => {
                let mut manager = InstanceLifecycleManager::new(
                    self.transport.clone(),
                    self.endpoints.provisioner.clone(),
                    self.endpoints.blob_base.clone(),
                    self.api_key.clone(),
                    job.request_id.clone(),
                    self.settings.instance.clone(),
                    self.progress.clone(),
                );
                let result = self
                    .run_on_instance(&mut manager, size, &mut poller, &submitter, &job)
                    .await;
                let cleanup = manager.terminate().await;
                match (result, cleanup) {
                    (Ok(_), Err(e)) => Err(e),
                    (Err(e), Err(cleanup_error)) => {
                        warn!(request_id = %job.request_id, error = %cleanup_error, "Instance cleanup failed");
                        Err(e)
                    }
                    (result, Ok(())) => result,
                }
            }
        };

        match result {
            Ok(result) => {
                let pkg_name = result
                    .pkg_name
                    .clone()
                    .or_else(|| find_package_name(poller.entries()));
                self.progress.on_progress(&ProgressEvent::Completed {
                    request_id: job.request_id.clone(),
                    pkg_name: pkg_name.clone(),
                    total_time: started.elapsed(),
                });
                Ok(BuildOutcome {
                    request_id: job.request_id,
                    pkg_name,
                    result: Some(result),
                })
            }
            Err(e) => {
                self.progress.on_progress(&ProgressEvent::Failed {
                    request_id: job.request_id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_on_instance(
        &self,
        manager: &mut InstanceLifecycleManager,
        size: InstanceSize,
        poller: &mut StatusLogPoller,
        submitter: &JobSubmitter,
        job: &BuildJob,
    ) -> Result<JobResult, BuildError> {
        manager.start(size).await?;
        self.renderer
            .line("# Instance requested. Wait a few minutes for initialization...");
        let host = manager.wait_until_booted().await?;
        self.renderer.line(&format!("# Instance running at {}...", host));
        manager.wait_until_ready(&host).await?;

        let endpoint = compiler_endpoint(
            self.endpoints.local_compiler.as_deref(),
            Some(&host),
            &self.endpoints.compiler,
            self.settings.instance.port,
        );
        let work = self.race_with_log(poller, &job.request_id, self.submit_and_collect(submitter, &endpoint, job));
        manager.supervise(&host, work).await
    }

    async fn submit_and_collect(&self, submitter: &JobSubmitter, endpoint: &str, job: &BuildJob) -> Result<JobResult, BuildError> {
        let outcome = submitter.submit(endpoint, job).await?;
        self.progress.on_progress(&ProgressEvent::Submitted {
            request_id: job.request_id.clone(),
            endpoint: endpoint.to_string(),
        });
        match outcome {
            SubmitOutcome::Completed(result) => Ok(result),
            SubmitOutcome::Deferred => self.wait_for_result_artifact(&job.request_id).await,
        }
    }

    /// Polls `{blob}/instance-response/{id}.json` until it exists.
    async fn wait_for_result_artifact(&self, request_id: &str) -> Result<JobResult, BuildError> {
        let url = format!(
            "{}/instance-response/{}.json",
            self.endpoints.blob_base.trim_end_matches('/'),
            request_id
        );
        loop {
            let response = with_retry(&self.settings.retry, "result artifact", || self.transport.get(&url)).await?;
            if !response.is_missing() {
                let response = ensure_success(&url, response)?;
                let normalized = response
                    .parse_json()
                    .and_then(envelope::normalize)
                    .map_err(|e| BuildError::BuildFailed {
                        request_id: request_id.to_string(),
                        message: format!("Compilation was not successful. ({})", e),
                    })?
                    .into_result()?;
                debug!(request_id, "Result artifact received");
                return Ok(JobResult::from_response(&normalized));
            }
            tokio::time::sleep(self.settings.result_poll).await;
        }
    }

    /// Runs `work` while the status log is followed. A failed or timed-out log
    /// aborts the work; a completed log gives the work a grace period to finish.
    async fn race_with_log<T, F>(&self, poller: &mut StatusLogPoller, request_id: &str, work: F) -> Result<T, BuildError>
    where
        F: Future<Output = Result<T, BuildError>>,
    {
        tokio::pin!(work);
        let outcome = tokio::select! {
            result = &mut work => Race::Work(result),
            state = poller.run(&self.settings.poll, self.cancel.clone()) => Race::Log(state),
        };

        match outcome {
            Race::Work(result) => {
                // trailing entries written after the result
                poller.poll_once().await;
                result
            }
            Race::Log(PollState::Complete) => {
                match tokio::time::timeout(self.settings.completion_grace, &mut work).await {
                    Ok(result) => result,
                    Err(_) => Err(BuildError::BuildFailed {
                        request_id: request_id.to_string(),
                        message: "Compilation was not successful.".to_string(),
                    }),
                }
            }
            Race::Log(PollState::Failed(message)) => Err(BuildError::BuildFailed {
                request_id: request_id.to_string(),
                message,
            }),
            Race::Log(PollState::TimedOut) => Err(BuildError::TimedOut {
                request_id: request_id.to_string(),
                waited_secs: self.settings.poll.max_wait.map(|d| d.as_secs()).unwrap_or_default(),
            }),
            Race::Log(PollState::Running) => Err(BuildError::Cancelled {
                request_id: request_id.to_string(),
            }),
        }
    }

    /// Follows an earlier request's log until it completes and returns the package
    /// name. Nothing is submitted and no instance is started or stopped.
    pub async fn resume(&self, request_id: &str, instance: Option<&str>) -> Result<BuildOutcome, BuildError> {
        if let Some(size) = instance {
            InstanceSize::parse(size)?;
        }
        info!(request_id, "Resuming request");

        let mut poller = self.poller(request_id);
        match poller.run(&self.settings.poll, self.cancel.clone()).await {
            PollState::Complete => {}
            PollState::Failed(message) => {
                return Err(BuildError::BuildFailed {
                    request_id: request_id.to_string(),
                    message,
                })
            }
            PollState::TimedOut => {
                return Err(BuildError::TimedOut {
                    request_id: request_id.to_string(),
                    waited_secs: self.settings.poll.max_wait.map(|d| d.as_secs()).unwrap_or_default(),
                })
            }
            PollState::Running => {
                return Err(BuildError::Cancelled {
                    request_id: request_id.to_string(),
                })
            }
        }

        let pkg_name = find_package_name(poller.entries())
            .ok_or_else(|| BuildError::InvalidResumeLog(request_id.to_string()))?;
        Ok(BuildOutcome {
            request_id: request_id.to_string(),
            pkg_name: Some(pkg_name),
            result: None,
        })
    }

    /// Asks the provisioning service to stop the instance of `request_id`.
    pub async fn terminate(&self, request_id: &str) -> Result<(), BuildError> {
        instance::stop_instance(
            self.transport.as_ref(),
            &self.settings.retry,
            &self.endpoints.provisioner,
            &self.api_key,
            request_id,
            None,
        )
        .await
    }
}
