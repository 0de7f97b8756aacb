// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and in-process metrics.
//!
//! Call [`init_telemetry`] once at startup. Supervisor operations record
//! their durations into [`GLOBAL_METRICS`] when the `telemetry` feature is
//! enabled:
//!
//! - `entity.start` / `entity.stop` for lifecycle transitions
//! - `catalog.discover` for `tools/list` refreshes
//! - `rpc.call` for correlated requests
//! - `store.<op>` for persistence writes
//! - `<server>.<tool>` for tool invocations
//!
//! ```rust,ignore
//! use agentvisor::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use metrics::{Latency, Metrics, MetricsSnapshot, ToolMetrics, GLOBAL_METRICS};
