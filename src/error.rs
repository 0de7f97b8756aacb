// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the supervisor.
//!
//! This module provides strongly-typed errors for different parts of the application,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation
//! at the binary boundary.

use thiserror::Error;

use crate::process::ProcessError;
use crate::rpc::RpcError;

/// Errors raised by entity and supervisor operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn '{entity}': {message}")]
    SpawnFailure { entity: String, message: String },

    #[error("Handshake with '{entity}' timed out after {timeout_ms}ms")]
    HandshakeTimeout { entity: String, timeout_ms: u64 },

    #[error("Handshake with '{entity}' failed: {message}")]
    HandshakeFailed { entity: String, message: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Entity '{0}' is not running")]
    NotRunning(String),

    #[error("Entity '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by '{entity}': {operation}")]
    Unsupported { entity: String, operation: String },

    #[error("Failed to terminate '{entity}': {message}")]
    TerminationFailed { entity: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
}

impl SupervisorError {
    /// Create a spawn failure.
    pub fn spawn(entity: impl Into<String>, err: &ProcessError) -> Self {
        Self::SpawnFailure {
            entity: entity.into(),
            message: err.to_string(),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(entity: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            entity: entity.into(),
            operation: operation.into(),
        }
    }

    /// Whether this failure moves the entity into the error state.
    ///
    /// Transport-level failures do. Per-call failures are only returned to
    /// the caller.
    pub fn changes_status(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailure { .. }
                | Self::HandshakeTimeout { .. }
                | Self::HandshakeFailed { .. }
                | Self::TerminationFailed { .. }
        )
    }

    /// Check if this is an RPC timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Rpc(e) if e.is_timeout())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("No configuration for entity '{0}'")]
    UnknownEntity(String),

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors from the persistence sink.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

/// Result type for supervisor operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_status() {
        let spawn = SupervisorError::SpawnFailure {
            entity: "fs".to_string(),
            message: "No such file".to_string(),
        };
        assert!(spawn.changes_status());

        let timeout = SupervisorError::Rpc(RpcError::Timeout {
            method: "tools/call".to_string(),
            timeout_ms: 5,
        });
        assert!(!timeout.changes_status());
        assert!(timeout.is_timeout());

        assert!(!SupervisorError::NotRunning("fs".to_string()).changes_status());
        assert!(!SupervisorError::AlreadyRunning("fs".to_string()).changes_status());
    }

    #[test]
    fn test_config_error_from_io() {
        let err: ConfigError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, ConfigError::NotFound(_)));

        let err: ConfigError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = SupervisorError::HandshakeTimeout {
            entity: "fs".to_string(),
            timeout_ms: 10_000,
        };
        assert_eq!(err.to_string(), "Handshake with 'fs' timed out after 10000ms");

        let err = SupervisorError::Rpc(RpcError::remote("boom"));
        assert!(err.to_string().contains("boom"));
    }
}
