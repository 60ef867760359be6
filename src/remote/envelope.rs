//! Response envelope normalization
//!
//! Some gateway layers wrap the real response as `{"body": "<json string>"}`.
//! Application failures are signalled in-band through `errorType`/`errorMessage`.

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response with any gateway wrapping removed
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub body: Value,
    /// `status` from the outer document, falling back to the unwrapped body
    pub status: Option<String>,
}

impl RemoteResponse {
    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }

    /// Fails with [`BuildError::Application`] when the body carries `errorType`.
    pub fn into_result(self) -> Result<Self, BuildError> {
        if let Some(error_type) = self.body.get("errorType") {
            let error_type = match error_type {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let message = self
                .body
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(BuildError::Application { error_type, message });
        }
        Ok(self)
    }
}

/// Unwraps a `{body: ...}` envelope, whether the inner body is a JSON string or an
/// object.
pub fn normalize(raw: Value) -> Result<RemoteResponse, BuildError> {
    let outer_status = status_of(&raw);
    let body = match raw {
        Value::Object(mut map) if map.contains_key("body") => match map.remove("body") {
            Some(Value::String(text)) => serde_json::from_str(&text).map_err(|e| {
                BuildError::InvalidResponse(format!("wrapped body is not JSON: {}", e))
            })?,
            Some(inner) => inner,
            None => Value::Null,
        },
        other => other,
    };
    let status = outer_status.or_else(|| status_of(&body));
    Ok(RemoteResponse { body, status })
}

fn status_of(value: &Value) -> Option<String> {
    value.get("status").and_then(Value::as_str).map(str::to_string)
}

/// What a finished build reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub pkg_name: Option<String>,
    pub status: Option<String>,
    pub raw: Value,
}

impl JobResult {
    pub fn from_response(response: &RemoteResponse) -> Self {
        Self {
            pkg_name: response
                .body
                .get("pkgName")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: response.status.clone(),
            raw: response.body.clone(),
        }
    }
}
