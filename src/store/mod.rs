// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence sink for discovered tools, status and tool-call history.
//!
//! The supervisor only writes through [`PersistenceSink`]; it never reads its
//! own writes back to make decisions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::catalog::{DiscoveredTool, ToolCallRecord};
use crate::entity::EntityStatus;
use crate::error::StoreError;

/// Write-only persistence used by the core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Replace every stored tool for `server_id` with `tools`.
    ///
    /// Readers must never observe a partially replaced set.
    async fn replace_tools(&self, server_id: &str, tools: &[DiscoveredTool]) -> Result<(), StoreError>;

    /// Record the last known status of an entity.
    async fn record_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Append a tool-call record.
    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<(), StoreError>;
}
