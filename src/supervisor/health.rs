// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic liveness checks.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::supervisor::Supervisor;
use crate::entity::EntityStatus;

/// Outcome of checking one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub entity_id: String,
    pub status: EntityStatus,
    pub error: Option<String>,
    /// Whether the status differed from the last broadcast one.
    pub changed: bool,
}

impl Supervisor {
    /// Run one health pass over every registered entity.
    ///
    /// Entities are probed concurrently. A status is broadcast and persisted
    /// only when it differs from the last broadcast value for that entity.
    /// Nothing is restarted.
    pub async fn check_health(&self) -> Vec<HealthReport> {
        let mut set = JoinSet::new();
        for entity in self.entities().await {
            let publisher = self.publisher().clone();
            set.spawn(async move {
                let (status, error) = entity.health_check().await;
                let changed = publisher
                    .publish_if_changed(entity.id(), status, error.clone())
                    .await;
                HealthReport {
                    entity_id: entity.id().to_string(),
                    status,
                    error,
                    changed,
                }
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Health check task failed"),
            }
        }
        reports.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        reports
    }

    /// Start the periodic health monitor, replacing any running one.
    ///
    /// The monitor holds only a weak reference and ends once the supervisor
    /// is dropped.
    pub fn spawn_health_monitor(self: &Arc<Self>) {
        let interval = self.settings().health_check_interval();
        let weak = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(supervisor) = weak.upgrade() else {
                    debug!("Supervisor dropped, health monitor exiting");
                    break;
                };

                let reports = supervisor.check_health().await;
                for report in reports.iter().filter(|r| r.changed) {
                    info!(
                        entity = %report.entity_id,
                        status = %report.status,
                        error = ?report.error,
                        "Health status changed"
                    );
                }
            }
        });

        self.stop_health_monitor();
        if let Ok(mut slot) = self.health_task.lock() {
            *slot = Some(task);
        }
        info!(interval_secs = interval.as_secs(), "Health monitor started");
    }
}
