// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool discovery and invocation against stub MCP servers.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agentvisor::config::StaticConfigSource;
use agentvisor::{
    EntityKind, EntityStatus, PersistenceSink, SqliteStore, Supervisor, SupervisorError,
    SupervisorEvent, SupervisorSettings,
};
use common::*;

fn limited(limit: u32) -> agentvisor::EntityConfig {
    tool_server().with_env([("LIMIT", limit.to_string())])
}

fn short_requests() -> SupervisorSettings {
    SupervisorSettings {
        request_timeout_ms: 300,
        ..fast_settings()
    }
}

#[tokio::test]
async fn test_start_discovers_tools() {
    let h = harness(vec![("fs", tool_server())]);
    h.supervisor.start("fs").await.unwrap();

    let tools = h.supervisor.catalog().tools("fs").await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "danger"]);
    assert_eq!(tools[0].description.as_deref(), Some("Echo input"));
    assert_eq!(tools[0].input_schema, json!({"type": "object"}));
    assert!(tools.iter().all(|t| t.server_id == "fs"));

    assert_eq!(h.store.tools("fs").await.unwrap().len(), 2);

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_empty_listing_yields_empty_catalog() {
    let empty = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -n "$id" ] && printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[]}}\n' "$id"
done
"#;
    let h = harness(vec![("bare", sh(EntityKind::ToolServer, empty))]);

    let snapshot = h.supervisor.start("bare").await.unwrap();
    assert_eq!(snapshot.status, EntityStatus::Running);

    assert!(h.supervisor.discover_tools("bare").await.unwrap().is_empty());
    assert_eq!(h.supervisor.catalog().tools("bare").await, Some(Vec::new()));

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_disabled_tools_are_filtered_and_rejected() {
    let h = harness(vec![("fs", tool_server().with_disabled_tools(["danger"]))]);
    h.supervisor.start("fs").await.unwrap();

    let tools = h.supervisor.catalog().tools("fs").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let err = h
        .supervisor
        .call_tool("fs", "danger", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Unsupported { .. }));
    assert!(h.store.tool_calls().await.is_empty());

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_call_tool_records_invocation() {
    let h = harness(vec![("fs", tool_server())]);
    h.supervisor.start("fs").await.unwrap();

    let result = h
        .supervisor
        .call_tool("fs", "echo", json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "ok");

    let calls = h.store.tool_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].server_id, "fs");
    assert_eq!(calls[0].tool_name, "echo");
    assert_eq!(calls[0].input, json!({"text": "hi"}));
    assert!(calls[0].success);
    assert!(calls[0].error.is_none());
    assert_eq!(calls[0].output.as_ref(), Some(&result));

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_rpc_timeout_keeps_entity_running() {
    // Answers initialize only.
    let h = harness_with(short_requests(), vec![("quiet", limited(1))]);

    let snapshot = h.supervisor.start("quiet").await.unwrap();
    assert_eq!(snapshot.status, EntityStatus::Running);
    assert!(h.supervisor.catalog().tools("quiet").await.is_none());

    let err = h
        .supervisor
        .call_tool("quiet", "echo", json!({}))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
    assert!(!err.changes_status());

    assert_eq!(
        h.supervisor.get("quiet").await.unwrap().status,
        EntityStatus::Running
    );

    let calls = h.store.tool_calls().await;
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].success);
    assert!(calls[0].output.is_none());
    assert!(calls[0].error.is_some());

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_failed_discovery_keeps_previous_catalog() {
    // Answers initialize and the first tools/list.
    let h = harness_with(short_requests(), vec![("fs", limited(2))]);
    h.supervisor.start("fs").await.unwrap();
    assert_eq!(h.supervisor.catalog().tools("fs").await.unwrap().len(), 2);

    let refreshed = h.supervisor.discover_tools("fs").await.unwrap();
    assert!(refreshed.is_empty());

    assert_eq!(h.supervisor.catalog().tools("fs").await.unwrap().len(), 2);
    assert_eq!(h.store.tools("fs").await.unwrap().len(), 2);
    assert_eq!(
        h.supervisor.get("fs").await.unwrap().status,
        EntityStatus::Running
    );

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_list_changed_triggers_rediscovery() {
    let h = harness(vec![("fs", tool_server())]);
    h.supervisor.start("fs").await.unwrap();
    let mut events = h.supervisor.subscribe();

    h.supervisor.call_tool("fs", "echo", json!({})).await.unwrap();

    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(SupervisorEvent::ToolCatalogUpdated {
                    entity_id,
                    tool_count,
                }) if entity_id == "fs" => return tool_count,
                Some(_) => continue,
                None => return 0,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(refreshed, 2);

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_tool_server_rejects_session_commands() {
    let h = harness(vec![("fs", tool_server())]);
    h.supervisor.start("fs").await.unwrap();

    let err = h.supervisor.add_context("fs", "src/lib.rs").await.unwrap_err();
    assert!(matches!(err, SupervisorError::Unsupported { .. }));

    let err = h.supervisor.submit_task("fs", "refactor").await.unwrap_err();
    assert!(matches!(err, SupervisorError::Unsupported { .. }));

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_call_tool_requires_running_entity() {
    let h = harness(vec![("fs", tool_server())]);
    h.supervisor.start("fs").await.unwrap();
    h.supervisor.stop("fs").await.unwrap();

    let err = h
        .supervisor
        .call_tool("fs", "echo", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::NotRunning(_)));
}

#[tokio::test]
async fn test_assistant_has_no_rpc() {
    let h = harness(vec![("coder", assistant())]);
    h.supervisor.start("coder").await.unwrap();

    let err = h
        .supervisor
        .call_tool("coder", "echo", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Unsupported { .. }));

    h.supervisor.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_store_receives_catalog_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("state.db")).unwrap());
    let sink: Arc<dyn PersistenceSink> = store.clone();

    let settings = fast_settings();
    let config = Arc::new(StaticConfigSource::with_entities(
        settings.clone(),
        [("fs", sh(EntityKind::ToolServer, MCP_STUB))],
    ));
    let supervisor = Supervisor::with_settings(config, sink, settings);

    supervisor.start("fs").await.unwrap();
    supervisor.call_tool("fs", "echo", json!({"text": "hi"})).await.unwrap();

    let tools = store.tools("fs").await.unwrap();
    assert_eq!(tools.len(), 2);
    assert_eq!(
        store.status("fs").await.unwrap(),
        Some(("running".to_string(), None))
    );
    assert_eq!(store.tool_call_count("fs").await.unwrap(), 1);

    supervisor.shutdown_all().await.unwrap();
    assert_eq!(
        store.status("fs").await.unwrap(),
        Some(("stopped".to_string(), None))
    );
}
