//! Operator-facing rendering of the remote status log

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Sink for status log output: appended lines plus one in-place status bar
pub trait StatusRenderer: Send + Sync {
    fn line(&self, text: &str);

    /// Replaces the in-place status bar contents
    fn status_bar(&self, text: &str);

    fn finish(&self);
}

/// Terminal renderer: lines are printed above a spinner that holds the status bar
pub struct ConsoleRenderer {
    bar: ProgressBar,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(250));
        Self { bar }
    }

    /// Plain renderer without the spinner, for `--quiet` and non-terminals
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRenderer for ConsoleRenderer {
    fn line(&self, text: &str) {
        if self.bar.is_hidden() {
            println!("{}", text);
        } else {
            self.bar.println(text);
        }
    }

    fn status_bar(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Keeps everything in memory; used by tests
#[derive(Default)]
pub struct RecordingRenderer {
    lines: Mutex<Vec<String>>,
    status: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<String> {
        self.status.lock().unwrap().clone()
    }
}

impl StatusRenderer for RecordingRenderer {
    fn line(&self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }

    fn status_bar(&self, text: &str) {
        self.status.lock().unwrap().push(text.to_string());
    }

    fn finish(&self) {}
}
