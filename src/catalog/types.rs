// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool catalog records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool declared by a tool server.
///
/// Identified by `(server_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema for the tool input, passed through unchanged.
    pub input_schema: Value,
    /// Whether the server marked the tool read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl DiscoveredTool {
    /// Parse one entry of a `tools/list` result.
    ///
    /// Entries without a string `name` are rejected.
    pub fn from_listing(server_id: &str, entry: &Value) -> Option<Self> {
        let name = entry.get("name")?.as_str()?.to_string();

        Some(Self {
            server_id: server_id.to_string(),
            name,
            description: entry
                .get("description")
                .and_then(|d| d.as_str())
                .map(|s| s.to_string()),
            input_schema: entry
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            read_only: entry
                .get("annotations")
                .and_then(|a| a.get("readOnlyHint"))
                .and_then(|r| r.as_bool())
                .unwrap_or(false),
        })
    }
}

/// Immutable record of one `tools/call` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub server_id: String,
    pub tool_name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub called_at: DateTime<Utc>,
}
