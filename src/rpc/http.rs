// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC over HTTP POST for tool servers reachable by URL.
//!
//! Each request is one POST. The server may answer with a plain JSON body
//! or with a `text/event-stream` body whose `data:` lines carry the
//! response envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::trace;

use super::error::{RpcError, RpcResult};
use super::protocol::{self, Incoming};

/// Header carrying the server-assigned session.
const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP JSON-RPC client for one endpoint.
pub struct HttpRpcClient {
    url: String,
    client: reqwest::Client,
    bearer_token: Option<String>,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl HttpRpcClient {
    /// Create a client for `url`.
    pub fn new(url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            bearer_token,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a request and wait for its response.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> RpcResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = protocol::request(id, method, params);

        let exchange = async {
            let response = self.post(&body).await?;
            let envelope = Self::find_response(id, &response)?;
            match envelope.get("error") {
                Some(error) => Err(RpcError::from_envelope(error)),
                None => Ok(envelope.get("result").cloned().unwrap_or(Value::Null)),
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| RpcError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Send a notification. The response body is ignored.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> RpcResult<()> {
        self.post(&protocol::notification(method, params)).await?;
        Ok(())
    }

    /// Forget the server-assigned session.
    pub async fn reset_session(&self) {
        *self.session_id.write().await = None;
    }

    async fn post(&self, body: &Value) -> RpcResult<Vec<Value>> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(body);

        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(session) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Http(format!("{} returned {}", self.url, status)));
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = response.text().await?;
        trace!(url = %self.url, bytes = text.len(), "HTTP RPC response");

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        if is_event_stream {
            Ok(parse_event_stream(&text))
        } else {
            let value: Value = serde_json::from_str(&text)?;
            match value {
                Value::Array(batch) => Ok(batch),
                other => Ok(vec![other]),
            }
        }
    }

    fn find_response(id: u64, messages: &[Value]) -> RpcResult<Value> {
        messages
            .iter()
            .find(|m| matches!(protocol::classify(m), Incoming::Response { id: rid, .. } if rid == id))
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse(format!("no response for request {}", id)))
    }
}

/// Extract JSON payloads from the `data:` lines of an SSE body.
pub fn parse_event_stream(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(&data) {
                messages.push(value);
            }
            data.clear();
        }
    }

    messages
}
