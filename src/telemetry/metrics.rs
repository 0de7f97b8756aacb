// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Latency and outcome counters for supervisor operations.
//!
//! Kept in process and read back through [`Metrics::snapshot`]; nothing is
//! exported.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Upper bounds of the latency buckets in microseconds. Anything slower
/// lands in a final open bucket.
const BUCKET_BOUNDS_US: [u64; 6] = [100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000];

/// Process-wide collector.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[derive(Debug)]
pub struct Metrics {
    /// Keyed by `<server>.<tool>`.
    tools: RwLock<HashMap<String, ToolMetrics>>,
    /// Keyed by operation name, e.g. `entity.start`.
    operations: RwLock<HashMap<String, Latency>>,
    started: Instant,
}

// Counters stay usable after a panic elsewhere poisoned the lock.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        write(&self.tools)
            .entry(name.to_string())
            .or_default()
            .record(duration, success);
    }

    pub fn record_operation(&self, name: &str, duration: Duration) {
        write(&self.operations)
            .entry(name.to_string())
            .or_default()
            .record(duration);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        read(&self.tools).get(name).cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<Latency> {
        read(&self.operations).get(name).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: read(&self.tools).clone(),
            operations: read(&self.operations).clone(),
            uptime: self.started.elapsed(),
        }
    }

    pub fn reset(&self) {
        write(&self.tools).clear();
        write(&self.operations).clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample count and bucketed durations for one named operation.
#[derive(Debug, Clone, Default)]
pub struct Latency {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
    buckets: [u64; BUCKET_BOUNDS_US.len() + 1],
}

impl Latency {
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        self.max = self.max.max(duration);

        let micros = duration.as_micros();
        let bucket = BUCKET_BOUNDS_US
            .iter()
            .position(|&bound| micros <= u128::from(bound))
            .unwrap_or(BUCKET_BOUNDS_US.len());
        self.buckets[bucket] += 1;
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total.as_nanos() / u128::from(self.count)) as u64)
    }

    /// Upper bound of the bucket holding quantile `q` (0.0 to 1.0).
    ///
    /// Samples in the open bucket report the slowest duration seen.
    pub fn quantile(&self, q: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let target = ((self.count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;

        let mut seen = 0;
        for (i, n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= target {
                return BUCKET_BOUNDS_US
                    .get(i)
                    .map_or(self.max, |&us| Duration::from_micros(us));
            }
        }
        self.max
    }
}

/// Outcomes of one `<server>.<tool>`.
#[derive(Debug, Clone, Default)]
pub struct ToolMetrics {
    pub latency: Latency,
    pub failures: u64,
}

impl ToolMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.latency.record(duration);
        if !success {
            self.failures += 1;
        }
    }

    pub fn calls(&self) -> u64 {
        self.latency.count
    }

    /// Fraction of calls that succeeded; 1.0 before the first call.
    pub fn success_rate(&self) -> f64 {
        match self.calls() {
            0 => 1.0,
            calls => (calls - self.failures) as f64 / calls as f64,
        }
    }
}

/// Copy of every counter at one instant.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, Latency>,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.operations.is_empty()
    }

    /// Plain-text summary with entries sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = format!("Supervisor metrics after {:.2?}\n", self.uptime);

        if !self.tools.is_empty() {
            report.push_str("Tool Calls:\n");
            let mut tools: Vec<_> = self.tools.iter().collect();
            tools.sort_by(|a, b| a.0.cmp(b.0));
            for (name, tool) in tools {
                let _ = writeln!(
                    report,
                    "  {}: {} calls, {:.1}% success, avg {:.2?}",
                    name,
                    tool.calls(),
                    tool.success_rate() * 100.0,
                    tool.latency.mean()
                );
            }
        }

        if !self.operations.is_empty() {
            report.push_str("Operations:\n");
            let mut operations: Vec<_> = self.operations.iter().collect();
            operations.sort_by(|a, b| a.0.cmp(b.0));
            for (name, latency) in operations {
                let _ = writeln!(
                    report,
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}",
                    name,
                    latency.count,
                    latency.mean(),
                    latency.quantile(0.99)
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_metrics_success_rate() {
        let mut tool = ToolMetrics::default();
        assert_eq!(tool.success_rate(), 1.0);

        tool.record(Duration::from_millis(100), true);
        tool.record(Duration::from_millis(200), true);
        tool.record(Duration::from_millis(50), false);

        assert_eq!(tool.calls(), 3);
        assert_eq!(tool.failures, 1);
        assert!((tool.success_rate() - 0.666).abs() < 0.01);
        assert_eq!(tool.latency.max, Duration::from_millis(200));
    }

    #[test]
    fn test_latency_mean() {
        let mut latency = Latency::default();
        assert_eq!(latency.mean(), Duration::ZERO);

        for ms in [10, 20, 30] {
            latency.record(Duration::from_millis(ms));
        }
        assert_eq!(latency.count, 3);
        assert_eq!(latency.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_latency_quantile_uses_bucket_bounds() {
        let mut latency = Latency::default();
        for _ in 0..9 {
            latency.record(Duration::from_micros(500));
        }
        latency.record(Duration::from_millis(50));

        assert_eq!(latency.quantile(0.5), Duration::from_millis(1));
        assert_eq!(latency.quantile(0.9), Duration::from_millis(1));
        assert_eq!(latency.quantile(0.99), Duration::from_millis(100));
    }

    #[test]
    fn test_latency_quantile_open_bucket_reports_max() {
        let mut latency = Latency::default();
        latency.record(Duration::from_secs(42));
        assert_eq!(latency.quantile(0.99), Duration::from_secs(42));
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();
        assert!(metrics.snapshot().is_empty());

        metrics.record_tool("fs.read_file", Duration::from_millis(100), true);
        metrics.record_operation("entity.start", Duration::from_millis(40));

        let snapshot = metrics.snapshot();
        assert!(!snapshot.is_empty());
        assert!(snapshot.tools.contains_key("fs.read_file"));
        assert_eq!(snapshot.operations["entity.start"].count, 1);

        let report = snapshot.format_report();
        assert!(report.contains("fs.read_file: 1 calls, 100.0% success"));
        assert!(report.contains("entity.start: 1 ops"));
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = Metrics::new();

        metrics.record_tool("fs.read_file", Duration::from_millis(100), false);
        metrics.record_operation("catalog.discover", Duration::from_millis(3));
        assert_eq!(metrics.tool_metrics("fs.read_file").unwrap().failures, 1);

        metrics.reset();

        assert!(metrics.tool_metrics("fs.read_file").is_none());
        assert!(metrics.operation_metrics("catalog.discover").is_none());
    }
}
