// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory persistence sink.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::PersistenceSink;
use crate::catalog::{DiscoveredTool, ToolCallRecord};
use crate::entity::EntityStatus;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    tools: HashMap<String, Vec<DiscoveredTool>>,
    statuses: HashMap<String, (EntityStatus, Option<String>)>,
    tool_calls: Vec<ToolCallRecord>,
}

/// Keeps everything in process memory.
///
/// The read accessors are for the embedding layer and tests; the
/// supervisor itself never calls them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored tools for a server, or `None` if nothing was ever stored.
    pub async fn tools(&self, server_id: &str) -> Option<Vec<DiscoveredTool>> {
        self.tables.read().await.tools.get(server_id).cloned()
    }

    /// Last recorded status for an entity.
    pub async fn status(&self, entity_id: &str) -> Option<(EntityStatus, Option<String>)> {
        self.tables.read().await.statuses.get(entity_id).cloned()
    }

    /// Every recorded tool call, oldest first.
    pub async fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.tables.read().await.tool_calls.clone()
    }
}

#[async_trait]
impl PersistenceSink for MemoryStore {
    async fn replace_tools(&self, server_id: &str, tools: &[DiscoveredTool]) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .tools
            .insert(server_id.to_string(), tools.to_vec());
        Ok(())
    }

    async fn record_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .statuses
            .insert(entity_id.to_string(), (status, error));
        Ok(())
    }

    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<(), StoreError> {
        self.tables.write().await.tool_calls.push(record.clone());
        Ok(())
    }
}
