//! Output formatting for build results and errors
//!
//! Human output is what an operator reads at the end of a build; JSON output is a
//! single document for scripts.

use anyhow::{Context, Result};
use serde_json::json;

use crate::error::BuildError;
use crate::payload::Payload;
use crate::remote::BuildOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_outcome(&self, outcome: &BuildOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let output = json!({
                    "requestId": outcome.request_id,
                    "pkgName": outcome.pkg_name,
                    "result": outcome.result.as_ref().map(|r| &r.raw),
                });
                serde_json::to_string_pretty(&output).context("Failed to serialize build outcome to JSON")
            }
            OutputFormat::Human => Ok(format_outcome_human(outcome)),
        }
    }

    /// `[CODE] message` for humans, `{"code", "message"}` for JSON
    pub fn format_error(&self, error: &BuildError) -> String {
        match self.format {
            OutputFormat::Json => json!({
                "code": error.code(),
                "message": error.to_string(),
            })
            .to_string(),
            OutputFormat::Human => format!("[{}] {}", error.code(), error),
        }
    }
}

fn format_outcome_human(outcome: &BuildOutcome) -> String {
    let mut output = String::new();
    output.push_str("\u{2713} Build complete\n");
    output.push_str(&format!("Request ID: {}\n", outcome.request_id));
    match &outcome.pkg_name {
        Some(pkg) => output.push_str(&format!("Package:    {}\n", pkg)),
        None => output.push_str("Package:    (not reported)\n"),
    }
    if let Some(status) = outcome.result.as_ref().and_then(|r| r.status.as_deref()) {
        output.push_str(&format!("Status:     {}\n", status));
    }
    output
}

/// Pretty JSON of the payload exactly as it would be submitted
pub fn format_payload(payload: &Payload) -> Result<String> {
    serde_json::to_string_pretty(payload).context("Failed to serialize payload to JSON")
}
