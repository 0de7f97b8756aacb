// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 envelopes used on the wire.

use serde_json::Value;

/// Protocol version sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name reported in the `initialize` handshake.
pub const CLIENT_NAME: &str = "agentvisor";

/// Build a request envelope.
pub fn request(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build a notification envelope (no id).
pub fn notification(method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        }),
        None => serde_json::json!({
            "jsonrpc": "2.0",
            "method": method
        }),
    }
}

/// Parameters for the `initialize` handshake.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": crate::VERSION
        }
    })
}

/// A message initiated by the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    /// Present when the remote sent a request rather than a notification.
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

/// Classification of an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A response to one of our requests.
    Response { id: u64, outcome: Value },
    /// A request or notification from the remote side.
    Remote(RpcNotification),
    /// Anything else.
    Unrecognized,
}

/// Classify an incoming JSON-RPC message.
///
/// Responses carry `result` or `error`. Ids sent as strings are accepted if
/// they parse as integers, since some servers echo ids back as strings.
pub fn classify(message: &Value) -> Incoming {
    let is_response = message.get("result").is_some() || message.get("error").is_some();

    if is_response {
        if let Some(id) = message.get("id").and_then(parse_id) {
            return Incoming::Response {
                id,
                outcome: message.clone(),
            };
        }
    }

    if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
        return Incoming::Remote(RpcNotification {
            id: message.get("id").filter(|id| !id.is_null()).cloned(),
            method: method.to_string(),
            params: message.get("params").cloned().unwrap_or(Value::Null),
        });
    }

    Incoming::Unrecognized
}

fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope() {
        let req = request(7, "tools/list", serde_json::json!({}));
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["id"], 7);
        assert_eq!(req["method"], "tools/list");
    }

    #[test]
    fn test_notification_without_params() {
        let n = notification("notifications/initialized", None);
        assert!(n.get("id").is_none());
        assert!(n.get("params").is_none());
    }

    #[test]
    fn test_classify_response() {
        let msg = serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": {}});
        assert!(matches!(classify(&msg), Incoming::Response { id: 3, .. }));

        let msg = serde_json::json!({"jsonrpc": "2.0", "id": "4", "error": {"message": "x"}});
        assert!(matches!(classify(&msg), Incoming::Response { id: 4, .. }));
    }

    #[test]
    fn test_classify_notification_and_request() {
        let msg = serde_json::json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"});
        match classify(&msg) {
            Incoming::Remote(n) => {
                assert_eq!(n.method, "notifications/tools/list_changed");
                assert!(n.id.is_none());
                assert_eq!(n.params, Value::Null);
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg = serde_json::json!({"jsonrpc": "2.0", "id": 9, "method": "roots/list"});
        match classify(&msg) {
            Incoming::Remote(n) => assert_eq!(n.id, Some(serde_json::json!(9))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_unrecognized() {
        assert_eq!(classify(&serde_json::json!({"hello": 1})), Incoming::Unrecognized);
    }
}
