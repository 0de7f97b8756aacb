// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-kind behavior plugged into the shared [`Entity`](super::Entity).
//!
//! The entity owns spawning, streaming, correlation and termination. A
//! strategy only decides how to launch the process, how to tell that it is
//! ready, and how to interpret or produce the kind-specific messages.

use std::sync::Arc;

use serde_json::Value;

use super::types::{SwarmTask, TaskStatus};
use crate::config::{EntityConfig, EntityKind};

/// How an entity proves it is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// `initialize` RPC followed by `notifications/initialized`.
    Initialize,
    /// Wait for this text to appear on stdout or stderr.
    OutputMarker(String),
    /// Ready as soon as the process is spawned.
    Immediate,
}

/// A context file change for an assistant session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    Add,
    Remove,
}

/// Something a strategy recognized in a framed stdout message.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TaskUpdate {
        task_id: String,
        status: TaskStatus,
        result: Option<Value>,
    },
}

/// Kind-specific capabilities of an entity.
pub trait TransportStrategy: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> EntityKind;

    /// Whether stdout carries JSON-RPC traffic to correlate.
    fn speaks_rpc(&self) -> bool {
        false
    }

    /// Command-line arguments for the process.
    fn build_args(&self, config: &EntityConfig) -> Vec<String> {
        config.args.clone()
    }

    /// Readiness check performed while the entity is starting.
    fn handshake(&self, config: &EntityConfig) -> Handshake;

    /// Interpret one framed stdout message.
    fn parse_output(&self, _message: &Value) -> Vec<DomainEvent> {
        Vec::new()
    }

    /// Stdin line that applies a context change, if the kind supports it.
    fn context_command(&self, _change: ContextChange, _path: &str) -> Option<String> {
        None
    }

    /// Stdin line that submits a task, if the kind supports it.
    fn task_message(&self, _task: &SwarmTask) -> Option<String> {
        None
    }
}

/// MCP tool server: JSON-RPC over stdio with an `initialize` handshake.
#[derive(Debug, Default)]
pub struct ToolServerStrategy;

impl TransportStrategy for ToolServerStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::ToolServer
    }

    fn speaks_rpc(&self) -> bool {
        true
    }

    fn handshake(&self, _config: &EntityConfig) -> Handshake {
        Handshake::Initialize
    }
}

/// Interactive coding assistant driven by plain-text stdin.
#[derive(Debug, Default)]
pub struct AssistantStrategy;

impl TransportStrategy for AssistantStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::Assistant
    }

    fn handshake(&self, config: &EntityConfig) -> Handshake {
        marker_or_immediate(config)
    }

    fn context_command(&self, change: ContextChange, path: &str) -> Option<String> {
        Some(match change {
            ContextChange::Add => format!("/add {}", path),
            ContextChange::Remove => format!("/drop {}", path),
        })
    }
}

/// Multi-agent swarm speaking an NDJSON task protocol.
///
/// Tasks go out as `{"type":"task","id":..,"description":..}`; progress
/// comes back as `{"type":"task_update","id":..,"status":..,"result":..}`.
#[derive(Debug, Default)]
pub struct SwarmStrategy;

impl TransportStrategy for SwarmStrategy {
    fn kind(&self) -> EntityKind {
        EntityKind::Swarm
    }

    fn handshake(&self, config: &EntityConfig) -> Handshake {
        marker_or_immediate(config)
    }

    fn parse_output(&self, message: &Value) -> Vec<DomainEvent> {
        if message.get("type").and_then(|t| t.as_str()) != Some("task_update") {
            return Vec::new();
        }

        let task_id = match message.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Vec::new(),
        };

        let Some(status) = message
            .get("status")
            .cloned()
            .and_then(|s| serde_json::from_value::<TaskStatus>(s).ok())
        else {
            return Vec::new();
        };

        vec![DomainEvent::TaskUpdate {
            task_id,
            status,
            result: message.get("result").cloned(),
        }]
    }

    fn task_message(&self, task: &SwarmTask) -> Option<String> {
        Some(
            serde_json::json!({
                "type": "task",
                "id": task.id,
                "description": task.description,
            })
            .to_string(),
        )
    }
}

fn marker_or_immediate(config: &EntityConfig) -> Handshake {
    match config.ready_marker.as_deref() {
        Some(marker) if !marker.is_empty() => Handshake::OutputMarker(marker.to_string()),
        _ => Handshake::Immediate,
    }
}

/// The strategy for an entity kind.
pub fn strategy_for(kind: EntityKind) -> Arc<dyn TransportStrategy> {
    match kind {
        EntityKind::ToolServer => Arc::new(ToolServerStrategy),
        EntityKind::Assistant => Arc::new(AssistantStrategy),
        EntityKind::Swarm => Arc::new(SwarmStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_strategy_for_kind() {
        for kind in [EntityKind::ToolServer, EntityKind::Assistant, EntityKind::Swarm] {
            assert_eq!(strategy_for(kind).kind(), kind);
        }
        assert!(strategy_for(EntityKind::ToolServer).speaks_rpc());
        assert!(!strategy_for(EntityKind::Swarm).speaks_rpc());
    }

    #[test]
    fn test_handshake_selection() {
        let plain = EntityConfig::stdio(EntityKind::Assistant, "aider");
        assert_eq!(AssistantStrategy.handshake(&plain), Handshake::Immediate);

        let marked = plain.clone().with_ready_marker("> ");
        assert_eq!(
            AssistantStrategy.handshake(&marked),
            Handshake::OutputMarker("> ".to_string())
        );
        assert_eq!(ToolServerStrategy.handshake(&marked), Handshake::Initialize);
    }

    #[test]
    fn test_assistant_context_commands() {
        assert_eq!(
            AssistantStrategy.context_command(ContextChange::Add, "src/main.rs"),
            Some("/add src/main.rs".to_string())
        );
        assert_eq!(
            AssistantStrategy.context_command(ContextChange::Remove, "src/main.rs"),
            Some("/drop src/main.rs".to_string())
        );
        assert!(ToolServerStrategy
            .context_command(ContextChange::Add, "x")
            .is_none());
    }

    #[test]
    fn test_swarm_task_message() {
        let task = SwarmTask {
            id: "t1".to_string(),
            description: "write tests".to_string(),
            status: TaskStatus::Queued,
            result: None,
            submitted_at: Utc::now(),
        };
        let line = SwarmStrategy.task_message(&task).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"type": "task", "id": "t1", "description": "write tests"}));
    }

    #[test]
    fn test_swarm_parse_task_update() {
        let events = SwarmStrategy.parse_output(&json!({
            "type": "task_update",
            "id": "t1",
            "status": "completed",
            "result": {"files": 2}
        }));
        assert_eq!(
            events,
            vec![DomainEvent::TaskUpdate {
                task_id: "t1".to_string(),
                status: TaskStatus::Completed,
                result: Some(json!({"files": 2})),
            }]
        );

        assert!(SwarmStrategy
            .parse_output(&json!({"type": "task_update", "id": "t1", "status": "bogus"}))
            .is_empty());
        assert!(SwarmStrategy.parse_output(&json!({"type": "log", "msg": "hi"})).is_empty());
    }
}
