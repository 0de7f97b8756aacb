// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request/response correlation for a bidirectional JSON-RPC channel.
//!
//! The correlator does not own the transport. Outgoing lines are pushed to
//! an `mpsc` channel drained by the process writer task, and the stdout
//! reader hands every decoded message to [`RpcCorrelator::dispatch_incoming`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::error::{RpcError, RpcResult};
use super::protocol::{self, Incoming, RpcNotification};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Default timeout for a single call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A request waiting for its response.
struct PendingRequest {
    method: String,
    submitted_at: Instant,
    reply: oneshot::Sender<RpcResult<Value>>,
}

type PendingMap = HashMap<u64, PendingRequest>;

/// Removes a call's pending entry when the call finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|p| p.into_inner())
}

/// Correlates responses with the calls that caused them.
pub struct RpcCorrelator {
    /// Entity id, for log context.
    label: String,
    /// Newline-free serialized messages for the writer task.
    outbound: mpsc::Sender<String>,
    /// Request ID counter.
    next_id: AtomicU64,
    /// In-flight requests by id.
    pending: Mutex<PendingMap>,
    /// Messages initiated by the remote side.
    notifications: mpsc::UnboundedSender<RpcNotification>,
}

impl RpcCorrelator {
    /// Create a correlator writing to `outbound`.
    ///
    /// Returns the receiving half of the notification channel alongside it.
    pub fn new(
        label: impl Into<String>,
        outbound: mpsc::Sender<String>,
    ) -> (Self, mpsc::UnboundedReceiver<RpcNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlator = Self {
            label: label.into(),
            outbound,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            notifications: tx,
        };
        (correlator, rx)
    }

    /// Send a request and wait for the correlated response.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> RpcResult<Value> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = lock(&self.pending);
            let mut id = self.next_id.fetch_add(1, Ordering::SeqCst);
            while pending.contains_key(&id) {
                id = self.next_id.fetch_add(1, Ordering::SeqCst);
            }
            pending.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    submitted_at: Instant::now(),
                    reply: tx,
                },
            );
            id
        };
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let line = serde_json::to_string(&protocol::request(id, method, params))?;

        trace!(entity = %self.label, id, method, "Sending request");
        if self.outbound.send(line).await.is_err() {
            return Err(RpcError::ConnectionClosed(format!(
                "writer for '{}' is gone",
                self.label
            )));
        }

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::ConnectionClosed("request dropped".to_string())),
            Err(_) => {
                debug!(entity = %self.label, id, method, "Request timed out");
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("rpc.call", start.elapsed());

        result
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> RpcResult<()> {
        let line = serde_json::to_string(&protocol::notification(method, params))?;
        self.outbound
            .send(line)
            .await
            .map_err(|_| RpcError::ConnectionClosed(format!("writer for '{}' is gone", self.label)))
    }

    /// Route one decoded message.
    ///
    /// Responses resolve their pending request. A response for an id that is
    /// no longer pending (it already timed out, or was never ours) is
    /// discarded. Everything carrying a `method` goes to the notification
    /// channel.
    pub async fn dispatch_incoming(&self, message: Value) {
        match protocol::classify(&message) {
            Incoming::Response { id, outcome } => {
                let Some(request) = lock(&self.pending).remove(&id) else {
                    debug!(entity = %self.label, id, "Discarding response with no pending request");
                    return;
                };

                trace!(
                    entity = %self.label,
                    id,
                    method = %request.method,
                    elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
                    "Response received"
                );

                let result = match outcome.get("error") {
                    Some(error) => Err(RpcError::from_envelope(error)),
                    None => Ok(outcome.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = request.reply.send(result);
            }
            Incoming::Remote(notification) => {
                trace!(entity = %self.label, method = %notification.method, "Remote notification");
                let _ = self.notifications.send(notification);
            }
            Incoming::Unrecognized => {
                trace!(entity = %self.label, "Ignoring unrecognized message");
            }
        }
    }

    /// Fail every pending request, e.g. because the process exited.
    pub async fn close(&self, reason: &str) {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        if !drained.is_empty() {
            debug!(entity = %self.label, count = drained.len(), reason, "Failing pending requests");
        }
        for (_, request) in drained {
            let _ = request
                .reply
                .send(Err(RpcError::ConnectionClosed(reason.to_string())));
        }
    }

    /// Number of in-flight requests.
    pub async fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn correlator() -> (
        Arc<RpcCorrelator>,
        mpsc::Receiver<String>,
        mpsc::UnboundedReceiver<RpcNotification>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let (correlator, notes) = RpcCorrelator::new("test", tx);
        (Arc::new(correlator), rx, notes)
    }

    fn request_id(line: &str) -> u64 {
        let value: Value = serde_json::from_str(line).unwrap();
        value["id"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (rpc, mut out, _notes) = correlator();

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move {
                rpc.call("initialize", serde_json::json!({}), Duration::from_secs(5))
                    .await
            })
        };

        let line = out.recv().await.unwrap();
        let sent: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(sent["method"], "initialize");
        assert_eq!(sent["jsonrpc"], "2.0");

        rpc.dispatch_incoming(serde_json::json!({
            "jsonrpc": "2.0",
            "id": sent["id"],
            "result": {"ok": true}
        }))
        .await;

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_reverse_order_responses_are_correlated() {
        let (rpc, mut out, _notes) = correlator();
        let n = 8;

        let mut callers = Vec::new();
        for i in 0..n {
            let rpc = Arc::clone(&rpc);
            callers.push(tokio::spawn(async move {
                let result = rpc
                    .call("echo", serde_json::json!({ "n": i }), Duration::from_secs(5))
                    .await
                    .unwrap();
                (i, result)
            }));
        }

        let mut sent = Vec::new();
        for _ in 0..n {
            let line = out.recv().await.unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            sent.push((value["id"].as_u64().unwrap(), value["params"]["n"].clone()));
        }

        for (id, n) in sent.into_iter().rev() {
            rpc.dispatch_incoming(serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"n": n}}))
                .await;
        }

        for caller in callers {
            let (i, result) = caller.await.unwrap();
            assert_eq!(result["n"], i);
        }
    }

    #[tokio::test]
    async fn test_remote_error_propagates_message() {
        let (rpc, mut out, _notes) = correlator();

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move {
                rpc.call("tools/call", serde_json::json!({}), Duration::from_secs(5))
                    .await
            })
        };

        let id = request_id(&out.recv().await.unwrap());
        rpc.dispatch_incoming(serde_json::json!({"id": id, "error": {"code": -1, "message": "bad tool"}}))
            .await;

        match caller.await.unwrap() {
            Err(RpcError::Remote { message, .. }) => assert_eq!(message, "bad tool"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_noop() {
        let (rpc, mut out, _notes) = correlator();

        let started = tokio::time::Instant::now();
        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move {
                rpc.call(
                    "tools/call",
                    serde_json::json!({"name": "x"}),
                    Duration::from_millis(5),
                )
                .await
            })
        };

        let id = request_id(&out.recv().await.unwrap());
        let result = caller.await.unwrap();
        assert!(matches!(result, Err(RpcError::Timeout { timeout_ms: 5, .. })));
        assert!(started.elapsed() >= Duration::from_millis(5));
        assert_eq!(rpc.pending_count().await, 0);

        rpc.dispatch_incoming(serde_json::json!({"id": id, "result": {}}))
            .await;
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let (rpc, _out, mut notes) = correlator();

        rpc.dispatch_incoming(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        }))
        .await;

        let note = notes.recv().await.unwrap();
        assert_eq!(note.method, "notifications/tools/list_changed");
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (rpc, mut out, _notes) = correlator();

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move {
                rpc.call("slow", Value::Null, Duration::from_secs(60)).await
            })
        };

        out.recv().await.unwrap();
        rpc.close("process exited").await;

        assert!(matches!(
            caller.await.unwrap(),
            Err(RpcError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_call_releases_pending_entry() {
        let (rpc, mut out, _notes) = correlator();

        let caller = {
            let rpc = Arc::clone(&rpc);
            tokio::spawn(async move {
                rpc.call("x", Value::Null, Duration::from_secs(60)).await
            })
        };

        let id = request_id(&out.recv().await.unwrap());
        assert_eq!(rpc.pending_count().await, 1);

        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        assert_eq!(rpc.pending_count().await, 0);

        rpc.dispatch_incoming(serde_json::json!({"id": id, "result": {}}))
            .await;
        assert_eq!(rpc.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_call_fails_when_writer_gone() {
        let (rpc, out, _notes) = correlator();
        drop(out);

        let result = rpc.call("x", Value::Null, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed(_))));
        assert_eq!(rpc.pending_count().await, 0);
    }
}
