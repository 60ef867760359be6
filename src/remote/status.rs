//! Incremental consumer of the remote status log
//!
//! The log is a JSON array at `{blob}/status/{requestId}.json` that only ever grows.
//! Each poll fetches the whole array and renders the entries past the cursor.

use super::transport::Transport;
use crate::progress::StatusRenderer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Message that marks a finished build
pub const COMPLETE_MESSAGE: &str = "Complete.";
/// Prefix of the entry that names the package being built
pub const COMPILING_PREFIX: &str = "Compiling ";
/// Prefix of entries that report a build failure
pub const ERROR_PREFIX: &str = "Error";
/// Entries with these messages update the status bar instead of adding lines
pub const STATUS_BAR_KEYS: [&str; 3] = ["Memory Usage", "Disk Usage", "CPU Usage"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub time: f64,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Running,
    Complete,
    Failed(String),
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Running)
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Overall ceiling; `None` waits until stopped
    pub max_wait: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            max_wait: None,
        }
    }
}

pub fn status_url(blob_base: &str, request_id: &str) -> String {
    format!("{}/status/{}.json", blob_base.trim_end_matches('/'), request_id)
}

pub struct StatusLogPoller {
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn StatusRenderer>,
    url: String,
    request_id: String,
    /// Number of entries already rendered
    cursor: usize,
    start_time: Option<f64>,
    entries: Vec<StatusEntry>,
    state: PollState,
}

impl StatusLogPoller {
    pub fn new(
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn StatusRenderer>,
        blob_base: &str,
        request_id: impl Into<String>,
    ) -> Self {
        let request_id = request_id.into();
        Self {
            transport,
            renderer,
            url: status_url(blob_base, &request_id),
            request_id,
            cursor: 0,
            start_time: None,
            entries: Vec::new(),
            state: PollState::Running,
        }
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Fetches the log once and renders anything new. Missing logs, transport
    /// failures and unparsable bodies leave the state untouched.
    pub async fn poll_once(&mut self) -> &PollState {
        let response = match self.transport.get(&self.url).await {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %self.request_id, error = %e, "Status fetch failed");
                return &self.state;
            }
        };
        if response.is_missing() {
            debug!(request_id = %self.request_id, "Status log not created yet");
            return &self.state;
        }
        if !response.is_success() {
            warn!(request_id = %self.request_id, status = response.status, "Unexpected status log response");
            return &self.state;
        }
        let entries: Vec<StatusEntry> = match serde_json::from_str(&response.body) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(request_id = %self.request_id, error = %e, "Status log not parseable yet");
                return &self.state;
            }
        };

        if entries.len() > self.cursor {
            if self.start_time.is_none() {
                self.start_time = entries.first().map(|e| e.time);
            }
            for entry in &entries[self.cursor..] {
                self.render(entry);
                self.observe(entry);
            }
            self.cursor = entries.len();
            self.entries = entries;
        }
        &self.state
    }

    fn render(&self, entry: &StatusEntry) {
        if STATUS_BAR_KEYS.contains(&entry.msg.as_str()) {
            let text = match &entry.data {
                Some(data) => format!("{}: {}", entry.msg, compact(data)),
                None => entry.msg.clone(),
            };
            self.renderer.status_bar(&text);
            return;
        }
        self.renderer.line(&format_entry(entry, self.start_time.unwrap_or(entry.time)));
    }

    fn observe(&mut self, entry: &StatusEntry) {
        if self.state.is_terminal() {
            return;
        }
        if entry.msg == COMPLETE_MESSAGE {
            self.state = PollState::Complete;
        } else if entry.msg.starts_with(ERROR_PREFIX) {
            self.state = PollState::Failed(entry.msg.clone());
        }
    }

    /// Polls until a terminal state, the wait ceiling, or cancellation. After
    /// cancellation exactly one more poll is made so trailing entries are shown.
    pub async fn run(&mut self, settings: &PollSettings, cancel: CancellationToken) -> PollState {
        let started = Instant::now();
        loop {
            self.poll_once().await;
            if self.state.is_terminal() || cancel.is_cancelled() {
                break;
            }
            if let Some(max_wait) = settings.max_wait {
                if started.elapsed() >= max_wait {
                    warn!(request_id = %self.request_id, waited_secs = max_wait.as_secs(), "Gave up waiting for status log");
                    self.state = PollState::TimedOut;
                    break;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(settings.interval) => {}
            }
        }
        self.renderer.finish();
        self.state.clone()
    }
}

/// `> {msg} @ {elapsed}s`; the suffix is omitted for entries at the start time.
pub fn format_entry(entry: &StatusEntry, start_time: f64) -> String {
    if entry.time == start_time {
        format!("> {}", entry.msg)
    } else {
        format!("> {} @ {:.4}s", entry.msg, entry.time - start_time)
    }
}

fn compact(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Package id of a finished build: a structured `data.pkgName` wins, otherwise the
/// first `Compiling <name>...` message is read up to the first `.`.
pub fn find_package_name(entries: &[StatusEntry]) -> Option<String> {
    let structured = entries.iter().find_map(|e| {
        e.data
            .as_ref()
            .and_then(|d| d.get("pkgName"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    if structured.is_some() {
        return structured;
    }

    entries.iter().find_map(|e| {
        let rest = e.msg.strip_prefix(COMPILING_PREFIX)?;
        let name = rest.split('.').next()?.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingRenderer;
    use crate::remote::mock::{MockReply, MockTransport};
    use serde_json::json;

    const BLOB: &str = "http://blob";

    fn entry(time: f64, msg: &str) -> Value {
        json!({"time": time, "msg": msg})
    }

    fn setup() -> (Arc<MockTransport>, Arc<RecordingRenderer>, StatusLogPoller) {
        let transport = Arc::new(MockTransport::new());
        let renderer = Arc::new(RecordingRenderer::new());
        let poller = StatusLogPoller::new(transport.clone(), renderer.clone(), BLOB, "req1");
        (transport, renderer, poller)
    }

    #[tokio::test]
    async fn test_renders_each_entry_once() {
        let (transport, renderer, mut poller) = setup();
        let url = status_url(BLOB, "req1");
        transport.add_replies(
            &url,
            [
                MockReply::json(json!([entry(10.0, "Started")])),
                MockReply::json(json!([entry(10.0, "Started"), entry(11.5, "Compiling p1...")])),
                MockReply::json(json!([entry(10.0, "Started"), entry(11.5, "Compiling p1...")])),
            ],
        );

        poller.poll_once().await;
        poller.poll_once().await;
        poller.poll_once().await;

        assert_eq!(
            renderer.lines(),
            vec!["> Started", "> Compiling p1... @ 1.5000s"]
        );
        assert_eq!(poller.state(), &PollState::Running);
    }

    #[tokio::test]
    async fn test_missing_log_is_not_an_error() {
        let (transport, renderer, mut poller) = setup();
        transport.add_reply(status_url(BLOB, "req1"), MockReply::status(404));

        assert_eq!(poller.poll_once().await, &PollState::Running);
        assert!(renderer.lines().is_empty());
    }

    #[tokio::test]
    async fn test_status_bar_entries_do_not_append_lines() {
        let (transport, renderer, mut poller) = setup();
        transport.add_json(
            status_url(BLOB, "req1"),
            json!([
                entry(1.0, "Started"),
                {"time": 2.0, "msg": "Memory Usage", "data": "42%"},
                entry(3.0, "Complete.")
            ]),
        );

        assert_eq!(poller.poll_once().await, &PollState::Complete);
        assert_eq!(renderer.lines(), vec!["> Started", "> Complete. @ 2.0000s"]);
        assert_eq!(renderer.status_updates(), vec!["Memory Usage: 42%"]);
    }

    #[tokio::test]
    async fn test_error_entry_fails() {
        let (transport, _renderer, mut poller) = setup();
        transport.add_json(
            status_url(BLOB, "req1"),
            json!([entry(1.0, "Started"), entry(2.0, "Error: out of memory")]),
        );

        assert_eq!(
            poller.poll_once().await,
            &PollState::Failed("Error: out of memory".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_stops_at_completion() {
        let (transport, _renderer, mut poller) = setup();
        transport.add_replies(
            &status_url(BLOB, "req1"),
            [
                MockReply::status(404),
                MockReply::json(json!([entry(1.0, "Started")])),
                MockReply::json(json!([entry(1.0, "Started"), entry(2.0, "Complete.")])),
            ],
        );
        let settings = PollSettings {
            interval: Duration::from_millis(5),
            max_wait: Some(Duration::from_secs(5)),
        };

        let state = poller.run(&settings, CancellationToken::new()).await;
        assert_eq!(state, PollState::Complete);
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let (_transport, _renderer, mut poller) = setup();
        let settings = PollSettings {
            interval: Duration::from_millis(5),
            max_wait: Some(Duration::from_millis(20)),
        };

        let state = poller.run(&settings, CancellationToken::new()).await;
        assert_eq!(state, PollState::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_allows_one_more_poll() {
        let (transport, _renderer, mut poller) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = poller.run(&PollSettings::default(), cancel).await;
        assert_eq!(state, PollState::Running);
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_package_name_from_compiling_message() {
        let entries: Vec<StatusEntry> = serde_json::from_value(json!([
            entry(1.0, "Started"),
            entry(2.0, "Compiling mypkg.zip"),
            entry(3.0, "Complete.")
        ]))
        .unwrap();
        assert_eq!(find_package_name(&entries).as_deref(), Some("mypkg"));
    }

    #[test]
    fn test_structured_package_name_preferred() {
        let entries: Vec<StatusEntry> = serde_json::from_value(json!([
            entry(1.0, "Compiling other..."),
            {"time": 2.0, "msg": "Complete.", "data": {"pkgName": "structured"}}
        ]))
        .unwrap();
        assert_eq!(find_package_name(&entries).as_deref(), Some("structured"));
    }

    #[test]
    fn test_no_package_name() {
        let entries: Vec<StatusEntry> =
            serde_json::from_value(json!([entry(1.0, "Complete.")])).unwrap();
        assert_eq!(find_package_name(&entries), None);
    }
}
