// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agentvisor - supervisor for external AI processes.
//!
//! Launches coding assistants, multi-agent swarms and MCP tool servers as
//! child processes, speaks to them over stdio (or HTTP for tool servers),
//! tracks their lifecycle, and reports status and output as events.
//!
//! # Architecture
//!
//! - [`rpc`] - Newline framing, JSON-RPC correlation and the HTTP client
//! - [`process`] - Child process handles and bounded output logs
//! - [`entity`] - One supervised entity plus the per-kind strategies
//! - [`supervisor`] - Registry, lifecycle serialization, health and events
//! - [`catalog`] - Tool discovery and invocation for tool servers
//! - [`store`] - Persistence sink for tools, status and tool calls
//! - [`config`] - Configuration files and the [`config::ConfigSource`] trait
//! - [`error`] - Error types and result aliases
//! - [`telemetry`] - Logging setup and in-process metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agentvisor::config::FileConfigSource;
//! use agentvisor::store::MemoryStore;
//! use agentvisor::Supervisor;
//!
//! let config = Arc::new(FileConfigSource::new("agentvisor.yaml"));
//! let supervisor = Supervisor::new(config, Arc::new(MemoryStore::new())).await?;
//! supervisor.start_enabled().await?;
//! // ...
//! supervisor.shutdown_all().await?;
//! ```

pub mod catalog;
pub mod config;
pub mod entity;
pub mod error;
pub mod process;
pub mod rpc;
pub mod store;
pub mod supervisor;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use catalog::{DiscoveredTool, ToolCallRecord, ToolCatalog};
pub use config::{AgentvisorConfig, ConfigSource, EntityConfig, EntityKind, SupervisorSettings};
pub use entity::{EntitySnapshot, EntityStatus};
pub use error::{ConfigError, Result, StoreError, SupervisorError, SupervisorResult};
pub use rpc::RpcError;
pub use store::{MemoryStore, PersistenceSink, SqliteStore};
pub use supervisor::{EventBus, ReloadOutcome, Supervisor, SupervisorEvent};

/// Agentvisor version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
