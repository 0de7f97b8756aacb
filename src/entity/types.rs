// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Entity state and snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{EntityKind, TransportKind};

/// Lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Registered but never started.
    #[default]
    Idle,
    /// Spawned, handshake in progress.
    Starting,
    /// Handshake succeeded.
    Running,
    /// Graceful stop in progress.
    Stopping,
    /// Stopped on request or exited cleanly.
    Stopped,
    /// Failed to start, crashed, or could not be stopped.
    #[serde(rename = "error")]
    Errored,
}

impl EntityStatus {
    /// Whether `start` is accepted in this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Errored)
    }

    /// Whether the entity may own a live process in this state.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "error",
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a swarm task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the task has finished one way or another.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A task submitted to a swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmTask {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub submitted_at: DateTime<Utc>,
}

/// Public view of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    pub kind: EntityKind,
    pub transport: TransportKind,
    pub status: EntityStatus,
    pub last_error: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Context files added to an assistant session.
    pub context_files: Vec<String>,
    /// Tasks submitted to a swarm.
    pub tasks: Vec<SwarmTask>,
}

/// Generate an entity id: `<kind>-<unix millis>-<8 hex chars>`.
pub fn generate_entity_id(kind: EntityKind) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", kind.as_str(), millis, &suffix[..8])
}
