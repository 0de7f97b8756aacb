// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Discovery and invocation of tool-server capabilities.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{DiscoveredTool, ToolCallRecord};
use crate::entity::Entity;
use crate::error::{SupervisorError, SupervisorResult};
use crate::store::PersistenceSink;
use crate::supervisor::events::{EventBus, SupervisorEvent};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Per-server tool sets, mirrored to the persistence sink.
pub struct ToolCatalog {
    store: Arc<dyn PersistenceSink>,
    bus: EventBus,
    servers: RwLock<HashMap<String, Vec<DiscoveredTool>>>,
}

impl ToolCatalog {
    pub fn new(store: Arc<dyn PersistenceSink>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Query `tools/list` and replace the stored set for this server.
    ///
    /// Any failure leaves the previous set in place and yields an empty
    /// list; it never affects the entity's status.
    pub async fn discover(&self, entity: &Entity) -> Vec<DiscoveredTool> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let server_id = entity.id();
        let listing = match entity.call("tools/list", serde_json::json!({}), None).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(entity = %server_id, error = %e, "Tool discovery failed");
                return Vec::new();
            }
        };

        let Some(entries) = listing.get("tools").and_then(|t| t.as_array()) else {
            warn!(entity = %server_id, "tools/list result has no tools array");
            return Vec::new();
        };

        let config = entity.config();
        let tools: Vec<DiscoveredTool> = entries
            .iter()
            .filter_map(|entry| DiscoveredTool::from_listing(server_id, entry))
            .filter(|tool| config.is_tool_enabled(&tool.name))
            .collect();

        if let Err(e) = self.store.replace_tools(server_id, &tools).await {
            warn!(entity = %server_id, error = %e, "Failed to persist discovered tools");
            return Vec::new();
        }

        self.servers
            .write()
            .await
            .insert(server_id.to_string(), tools.clone());

        info!(entity = %server_id, count = tools.len(), "Tool catalog updated");
        self.bus.publish(SupervisorEvent::ToolCatalogUpdated {
            entity_id: server_id.to_string(),
            tool_count: tools.len(),
        });

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("catalog.discover", start.elapsed());

        tools
    }

    /// Tools for a server, or `None` if no discovery has succeeded yet.
    pub async fn tools(&self, server_id: &str) -> Option<Vec<DiscoveredTool>> {
        self.servers.read().await.get(server_id).cloned()
    }

    /// Number of servers with a catalog.
    pub async fn server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Drop the in-memory set for a removed server.
    pub async fn forget(&self, server_id: &str) {
        self.servers.write().await.remove(server_id);
    }

    /// Invoke a tool and record the call whatever its outcome.
    ///
    /// The result is returned unchanged. RPC failures are recorded and then
    /// returned to the caller.
    pub async fn call_tool(
        &self,
        entity: &Entity,
        tool_name: &str,
        arguments: Value,
    ) -> SupervisorResult<Value> {
        let server_id = entity.id();
        if !entity.config().is_tool_enabled(tool_name) {
            return Err(SupervisorError::unsupported(
                server_id,
                format!("tool '{}' is disabled", tool_name),
            ));
        }

        let started = Instant::now();
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments.clone(),
        });
        let result = entity.call("tools/call", params, None).await;
        let duration = started.elapsed();

        let reported_error = result
            .as_ref()
            .ok()
            .and_then(|v| v.get("isError"))
            .and_then(|e| e.as_bool())
            .unwrap_or(false);

        let record = ToolCallRecord {
            server_id: server_id.to_string(),
            tool_name: tool_name.to_string(),
            input: arguments,
            output: result.as_ref().ok().cloned(),
            success: result.is_ok() && !reported_error,
            error: match &result {
                Err(e) => Some(e.to_string()),
                Ok(_) if reported_error => Some("tool reported an error".to_string()),
                Ok(_) => None,
            },
            duration_ms: duration.as_millis() as u64,
            called_at: Utc::now(),
        };

        debug!(
            entity = %server_id,
            tool = %tool_name,
            success = record.success,
            duration_ms = record.duration_ms,
            "Tool call finished"
        );

        if let Err(e) = self.store.record_tool_call(&record).await {
            warn!(entity = %server_id, tool = %tool_name, error = %e, "Failed to record tool call");
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tool(&format!("{}.{}", server_id, tool_name), duration, record.success);

        result
    }
}
