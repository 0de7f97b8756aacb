// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Entity registry, health monitoring and outward events.
//!
//! # Architecture
//!
//! ```text
//!  operator ──start/stop/reload──▶ Supervisor ──▶ Entity ──▶ ProcessHandle
//!                                      │            │
//!                   health monitor ────┤            ├── status ──▶ StatusPublisher ──▶ store
//!                                      │            │                    │
//!                   ToolCatalog ◀──────┘            └── output ──────────┴──▶ EventBus ──▶ subscribers
//! ```

pub mod events;
mod health;
#[allow(clippy::module_inception)]
mod supervisor;

pub use events::{EventBus, EventReceiver, StatusPublisher, SupervisorEvent};
pub use health::HealthReport;
pub use supervisor::{ReloadOutcome, Supervisor};
