// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite persistence sink.
//!
//! Blocking `rusqlite` calls run on the blocking pool. `replace_tools` runs
//! its delete and inserts in one transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::PersistenceSink;
use crate::catalog::{DiscoveredTool, ToolCallRecord};
use crate::entity::EntityStatus;
use crate::error::StoreError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
#[cfg(feature = "telemetry")]
use std::time::Instant;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tools (
    server_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    input_schema TEXT NOT NULL,
    read_only INTEGER NOT NULL DEFAULT 0,
    discovered_at TEXT NOT NULL,
    PRIMARY KEY (server_id, name)
);

CREATE TABLE IF NOT EXISTS entity_status (
    entity_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    error TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    input TEXT NOT NULL,
    output TEXT,
    success INTEGER NOT NULL,
    error TEXT,
    duration_ms INTEGER NOT NULL,
    called_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tool_calls_server ON tool_calls(server_id);
"#;

/// SQLite-backed sink.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("{} task failed: {}", op, e)))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation(op, start.elapsed());

        result
    }

    /// Stored tools for a server, ordered by name.
    pub async fn tools(&self, server_id: &str) -> Result<Vec<DiscoveredTool>, StoreError> {
        let server_id = server_id.to_string();
        self.with_conn("store.tools", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT name, description, input_schema, read_only FROM tools
                 WHERE server_id = ?1 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![server_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?;

            let mut tools = Vec::new();
            for row in rows {
                let (name, description, schema, read_only) = row?;
                tools.push(DiscoveredTool {
                    server_id: server_id.clone(),
                    name,
                    description,
                    input_schema: serde_json::from_str(&schema)?,
                    read_only,
                });
            }
            Ok(tools)
        })
        .await
    }

    /// Last recorded status for an entity.
    pub async fn status(&self, entity_id: &str) -> Result<Option<(String, Option<String>)>, StoreError> {
        let entity_id = entity_id.to_string();
        self.with_conn("store.status", move |conn| {
            Ok(conn
                .query_row(
                    "SELECT status, error FROM entity_status WHERE entity_id = ?1",
                    params![entity_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })
        .await
    }

    /// Number of recorded calls for a server.
    pub async fn tool_call_count(&self, server_id: &str) -> Result<u64, StoreError> {
        let server_id = server_id.to_string();
        self.with_conn("store.tool_call_count", move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tool_calls WHERE server_id = ?1",
                params![server_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }
}

#[async_trait]
impl PersistenceSink for SqliteStore {
    async fn replace_tools(&self, server_id: &str, tools: &[DiscoveredTool]) -> Result<(), StoreError> {
        let server_id = server_id.to_string();
        let tools = tools.to_vec();

        self.with_conn("store.replace_tools", move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM tools WHERE server_id = ?1", params![server_id])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO tools
                     (server_id, name, description, input_schema, read_only, discovered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for tool in &tools {
                    stmt.execute(params![
                        server_id,
                        tool.name,
                        tool.description,
                        serde_json::to_string(&tool.input_schema)?,
                        tool.read_only,
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn record_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let entity_id = entity_id.to_string();

        self.with_conn("store.record_status", move |conn| {
            conn.execute(
                "INSERT INTO entity_status (entity_id, status, error, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_id) DO UPDATE SET
                     status = excluded.status,
                     error = excluded.error,
                     updated_at = excluded.updated_at",
                params![entity_id, status.as_str(), error, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<(), StoreError> {
        let record = record.clone();

        self.with_conn("store.record_tool_call", move |conn| {
            conn.execute(
                "INSERT INTO tool_calls
                 (server_id, tool_name, input, output, success, error, duration_ms, called_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.server_id,
                    record.tool_name,
                    serde_json::to_string(&record.input)?,
                    record.output.as_ref().map(serde_json::to_string).transpose()?,
                    record.success,
                    record.error,
                    record.duration_ms as i64,
                    record.called_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}
