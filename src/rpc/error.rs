// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for JSON-RPC transport and correlation.

use thiserror::Error;

/// Errors that can occur while exchanging JSON-RPC messages with an entity.
#[derive(Error, Debug)]
pub enum RpcError {
    /// No matching response arrived before the deadline.
    #[error("RPC request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The remote side answered with an error envelope.
    #[error("RPC error response: {message}")]
    Remote {
        code: Option<i64>,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The connection went away before a response arrived.
    #[error("RPC connection closed: {0}")]
    ConnectionClosed(String),

    /// The remote answered with something that is not a JSON-RPC response.
    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    /// HTTP transport failure.
    #[error("HTTP transport error: {0}")]
    Http(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Create a remote error from the `error` member of a response envelope.
    ///
    /// A missing message falls back to "Unknown error".
    pub fn from_envelope(error: &serde_json::Value) -> Self {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();

        Self::Remote {
            code: error.get("code").and_then(|c| c.as_i64()),
            message,
            data: error.get("data").cloned(),
        }
    }

    /// Create a remote error with a message only.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the remote reported the error (as opposed to the transport).
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = std::result::Result<T, RpcError>;
