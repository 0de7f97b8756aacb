// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Supervised entities.
//!
//! Tool servers, assistant sessions and swarms share one [`Entity`]
//! implementation. What differs between them is captured by a
//! [`TransportStrategy`]:
//!
//! | Kind | Stdout | Handshake | Extra commands |
//! |------|--------|-----------|----------------|
//! | tool server | JSON-RPC | `initialize` | RPC calls |
//! | assistant | free text | ready marker or none | `/add`, `/drop` |
//! | swarm | NDJSON task updates | ready marker or none | task submission |

#[allow(clippy::module_inception)]
mod entity;
pub mod strategy;
pub mod types;

pub use entity::{Entity, RemoteMessage, HEALTH_PROBE_TIMEOUT};
pub use strategy::{
    strategy_for, AssistantStrategy, ContextChange, DomainEvent, Handshake, SwarmStrategy,
    ToolServerStrategy, TransportStrategy,
};
pub use types::{generate_entity_id, EntitySnapshot, EntityStatus, SwarmTask, TaskStatus};
