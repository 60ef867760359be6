//! Scripted transport for tests
//!
//! Replies are queued per route. A route is the URL for GETs and plain POSTs, or
//! `url#action` when the POST body carries an `action` field (the provisioning
//! service multiplexes start/status/stop on one URL). The last reply on a route is
//! sticky so polling loops can run against a single scripted state. A route ending
//! in `*` matches any URL with that prefix when no exact route exists, which covers
//! URLs built from generated request ids.

use super::transport::{HttpResponse, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum MockReply {
    Response(HttpResponse),
    Error(TransportError),
    /// Never completes; used to simulate a hung host
    Hang,
}

impl MockReply {
    pub fn json(value: Value) -> Self {
        MockReply::Response(HttpResponse::json(&value))
    }

    pub fn status(status: u16) -> Self {
        MockReply::Response(HttpResponse::new(status, ""))
    }
}

/// One recorded request
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reply(&self, route: impl Into<String>, reply: MockReply) {
        self.routes
            .lock()
            .unwrap()
            .entry(route.into())
            .or_default()
            .push_back(reply);
    }

    pub fn add_json(&self, route: impl Into<String>, value: Value) {
        self.add_reply(route, MockReply::json(value));
    }

    pub fn add_replies(&self, route: &str, replies: impl IntoIterator<Item = MockReply>) {
        for reply in replies {
            self.add_reply(route, reply);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose route (see module docs) equals `route`
    pub fn calls_to(&self, route: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| route_for(&c.url, c.body.as_ref()) == route)
            .collect()
    }

    fn next_reply(&self, route: &str) -> MockReply {
        let mut routes = self.routes.lock().unwrap();
        let key = if routes.contains_key(route) {
            Some(route.to_string())
        } else {
            routes
                .keys()
                .find(|key| key.strip_suffix('*').is_some_and(|prefix| route.starts_with(prefix)))
                .cloned()
        };
        match key.and_then(|key| routes.get_mut(&key)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockReply::status(404)),
            Some(queue) => queue.front().cloned().unwrap_or(MockReply::status(404)),
            None => MockReply::status(404),
        }
    }

    async fn reply(&self, method: &'static str, url: &str, body: Option<&Value>) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });

        let route = route_for(url, body);
        match self.next_reply(&route) {
            MockReply::Response(response) => Ok(response),
            MockReply::Error(e) => Err(e),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

fn route_for(url: &str, body: Option<&Value>) -> String {
    match body.and_then(|b| b.get("action")).and_then(Value::as_str) {
        Some(action) => format!("{}#{}", url, action),
        None => url.to_string(),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, TransportError> {
        self.reply("POST", url, Some(body)).await
    }

    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.reply("GET", url, None).await
    }
}
