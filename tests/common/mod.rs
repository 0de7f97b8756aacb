// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shell stubs and helpers shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agentvisor::config::StaticConfigSource;
use agentvisor::{
    EntityConfig, EntityKind, EntityStatus, MemoryStore, PersistenceSink, Supervisor,
    SupervisorEvent, SupervisorSettings,
};

/// Answers every JSON-RPC request with a two-tool listing.
///
/// `LIMIT` caps how many requests get an answer; later ones are read and
/// ignored. A `tools/call` is followed by a `tools/list_changed`
/// notification.
pub const MCP_STUB: &str = r#"
n=0
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  if [ -z "$id" ]; then continue; fi
  n=$((n + 1))
  if [ "$n" -gt "${LIMIT:-1000000}" ]; then continue; fi
  printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo input","inputSchema":{"type":"object"}},{"name":"danger"}],"content":[{"type":"text","text":"ok"}]}}\n' "$id"
  case "$line" in
    *tools/call*) printf '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}\n' ;;
  esac
done
"#;

/// Like [`MCP_STUB`] but ignores SIGTERM.
pub fn stubborn_mcp_stub() -> String {
    format!("trap '' TERM\n{}", MCP_STUB)
}

/// Prints a ready marker, then echoes every input line.
pub const ASSISTANT_STUB: &str = r#"
echo "loading"
echo "ready> "
while IFS= read -r line; do
  echo "got: $line"
  if [ "$line" = "quit" ]; then exit 0; fi
  if [ "$line" = "crash" ]; then exit 3; fi
done
"#;

/// Completes every submitted task.
pub const SWARM_STUB: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  if [ -n "$id" ]; then
    printf '{"type":"task_update","id":"%s","status":"running"}\n' "$id"
    printf '{"type":"task_update","id":"%s","status":"completed","result":{"ok":true}}\n' "$id"
  fi
done
"#;

pub fn sh(kind: EntityKind, script: &str) -> EntityConfig {
    EntityConfig::stdio(kind, "/bin/sh").with_args(["-c", script])
}

pub fn tool_server() -> EntityConfig {
    sh(EntityKind::ToolServer, MCP_STUB)
}

pub fn assistant() -> EntityConfig {
    sh(EntityKind::Assistant, ASSISTANT_STUB).with_ready_marker("ready>")
}

pub fn swarm() -> EntityConfig {
    sh(EntityKind::Swarm, SWARM_STUB)
}

/// Settings with short timeouts so failure paths finish quickly.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        stop_grace_ms: 300,
        request_timeout_ms: 2_000,
        handshake_timeout_ms: 3_000,
        ..SupervisorSettings::default()
    }
}

pub struct Harness {
    pub supervisor: Arc<Supervisor>,
    pub config: Arc<StaticConfigSource>,
    pub store: Arc<MemoryStore>,
}

pub fn harness(entities: Vec<(&str, EntityConfig)>) -> Harness {
    harness_with(fast_settings(), entities)
}

pub fn harness_with(settings: SupervisorSettings, entities: Vec<(&str, EntityConfig)>) -> Harness {
    let config = Arc::new(StaticConfigSource::with_entities(settings.clone(), entities));
    let store = Arc::new(MemoryStore::new());
    let sink: Arc<dyn PersistenceSink> = store.clone();
    let supervisor = Supervisor::with_settings(config.clone(), sink, settings);
    Harness {
        supervisor,
        config,
        store,
    }
}

/// How long polling helpers wait before giving up.
pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `check` until it returns true or [`WAIT`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until an entity reports `status`.
pub async fn wait_for_status(supervisor: &Arc<Supervisor>, id: &str, status: EntityStatus) -> bool {
    eventually(|| {
        let supervisor = supervisor.clone();
        let id = id.to_string();
        async move { supervisor.get(&id).await.map(|s| s.status) == Some(status) }
    })
    .await
}

/// Wait until an entity's output log contains `needle`.
pub async fn wait_for_output(supervisor: &Arc<Supervisor>, id: &str, needle: &str) -> bool {
    eventually(|| {
        let supervisor = supervisor.clone();
        let id = id.to_string();
        let needle = needle.to_string();
        async move {
            supervisor
                .output(&id, 0)
                .await
                .map(|entries| entries.iter().any(|e| e.text.contains(&needle)))
                .unwrap_or(false)
        }
    })
    .await
}

/// Drain status events for one entity that are already queued.
pub fn drain_statuses(
    events: &mut agentvisor::supervisor::EventReceiver,
    entity: &str,
) -> Vec<EntityStatus> {
    let mut statuses = Vec::new();
    while let Some(event) = events.try_recv() {
        if let SupervisorEvent::StatusChanged {
            entity_id, status, ..
        } = event
        {
            if entity_id == entity {
                statuses.push(status);
            }
        }
    }
    statuses
}

pub fn process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
