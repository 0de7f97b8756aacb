// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Registry of supervised entities.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::events::{EventBus, EventReceiver, StatusPublisher};
use crate::catalog::{DiscoveredTool, ToolCatalog};
use crate::config::{ConfigSource, EntityKind, SupervisorSettings};
use crate::entity::{Entity, EntitySnapshot, EntityStatus, RemoteMessage};
use crate::error::{SupervisorError, SupervisorResult};
use crate::process::{OutputEntry, OutputLog};
use crate::store::PersistenceSink;

/// Method a tool server sends when its tool set changed.
const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// What `reload` did with an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// Enabled in configuration: stopped if running, then started.
    Restarted(EntitySnapshot),
    /// Disabled in configuration: stopped if it was registered.
    Stopped,
    /// No longer configured: stopped and unregistered.
    Removed,
}

/// Starts, stops and monitors entities.
///
/// Start and stop for the same id are serialized, so at most one process
/// exists per id. Commands go straight to the entity.
pub struct Supervisor {
    config: Arc<dyn ConfigSource>,
    settings: SupervisorSettings,
    publisher: Arc<StatusPublisher>,
    catalog: ToolCatalog,
    registry: RwLock<HashMap<String, Arc<Entity>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    remote_tx: mpsc::UnboundedSender<RemoteMessage>,
    pub(super) health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Create a supervisor using the settings from `config`.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn new(
        config: Arc<dyn ConfigSource>,
        store: Arc<dyn PersistenceSink>,
    ) -> SupervisorResult<Arc<Self>> {
        let settings = config.settings().await?;
        Ok(Self::with_settings(config, store, settings))
    }

    /// Create a supervisor with explicit settings.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_settings(
        config: Arc<dyn ConfigSource>,
        store: Arc<dyn PersistenceSink>,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        let bus = EventBus::new();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        let supervisor = Arc::new(Self {
            config,
            settings,
            publisher: Arc::new(StatusPublisher::new(bus.clone(), store.clone())),
            catalog: ToolCatalog::new(store, bus),
            registry: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            remote_tx,
            health_task: std::sync::Mutex::new(None),
        });

        tokio::spawn(listen_remote(Arc::downgrade(&supervisor), remote_rx));
        supervisor
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// The bus carrying every outward event.
    pub fn events(&self) -> &EventBus {
        self.publisher.bus()
    }

    /// Subscribe to outward events.
    pub fn subscribe(&self) -> EventReceiver {
        self.publisher.bus().subscribe()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub(super) fn publisher(&self) -> &Arc<StatusPublisher> {
        &self.publisher
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    async fn entity(&self, id: &str) -> SupervisorResult<Arc<Entity>> {
        self.registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))
    }

    pub(super) async fn entities(&self) -> Vec<Arc<Entity>> {
        self.registry.read().await.values().cloned().collect()
    }

    /// Start an entity from its current configuration.
    ///
    /// An entity that is already registered is fully stopped first. A failed
    /// start leaves the entity registered in the error state.
    pub async fn start(&self, id: &str) -> SupervisorResult<EntitySnapshot> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    async fn start_locked(&self, id: &str) -> SupervisorResult<EntitySnapshot> {
        let config = self
            .config
            .entity_config(id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        config.validate(id)?;

        let previous = self.registry.read().await.get(id).cloned();
        let log = match previous {
            Some(previous) => {
                debug!(entity = %id, "Stopping previous instance before start");
                previous.stop().await?;
                previous.log()
            }
            None => Arc::new(OutputLog::new(self.settings.output_log_capacity)),
        };

        let entity = Arc::new(Entity::with_log(
            id,
            config,
            &self.settings,
            self.publisher.clone(),
            self.remote_tx.clone(),
            log,
        ));
        self.registry
            .write()
            .await
            .insert(id.to_string(), entity.clone());

        entity.start().await?;

        if entity.config().kind == EntityKind::ToolServer {
            self.catalog.discover(&entity).await;
        }

        Ok(entity.snapshot().await)
    }

    /// Stop an entity. It stays registered.
    pub async fn stop(&self, id: &str) -> SupervisorResult<EntitySnapshot> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let entity = self.entity(id).await?;
        entity.stop().await?;
        Ok(entity.snapshot().await)
    }

    /// Stop then start.
    pub async fn restart(&self, id: &str) -> SupervisorResult<EntitySnapshot> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        info!(entity = %id, "Restarting entity");
        self.start_locked(id).await
    }

    /// Re-read configuration and apply it.
    pub async fn reload(&self, id: &str) -> SupervisorResult<ReloadOutcome> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        match self.config.entity_config(id).await? {
            Some(config) if config.enabled => {
                info!(entity = %id, "Reloading enabled entity");
                self.start_locked(id).await.map(ReloadOutcome::Restarted)
            }
            Some(_) => {
                info!(entity = %id, "Entity disabled, stopping");
                let entity = self.registry.read().await.get(id).cloned();
                if let Some(entity) = entity {
                    entity.stop().await?;
                }
                Ok(ReloadOutcome::Stopped)
            }
            None => {
                info!(entity = %id, "Entity no longer configured, removing");
                self.remove_locked(id).await?;
                Ok(ReloadOutcome::Removed)
            }
        }
    }

    /// Stop an entity and unregister it once its process is gone.
    pub async fn remove(&self, id: &str) -> SupervisorResult<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.remove_locked(id).await
    }

    async fn remove_locked(&self, id: &str) -> SupervisorResult<()> {
        let entity = self.registry.read().await.get(id).cloned();
        let Some(entity) = entity else {
            return Ok(());
        };

        entity.stop().await?;
        self.registry.write().await.remove(id);
        self.catalog.forget(id).await;
        self.publisher.forget(id).await;
        self.release_lock(id).await;
        info!(entity = %id, "Entity removed");
        Ok(())
    }

    /// Drop the per-id lock of a removed entity unless someone else is
    /// waiting on it. The map and the caller's handle account for two
    /// references.
    async fn release_lock(&self, id: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) <= 2) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Snapshots of every registered entity, sorted by id.
    pub async fn list(&self) -> Vec<EntitySnapshot> {
        let entities = self.entities().await;
        let mut snapshots = Vec::with_capacity(entities.len());
        for entity in entities {
            snapshots.push(entity.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Snapshot of one entity.
    pub async fn get(&self, id: &str) -> Option<EntitySnapshot> {
        match self.entity(id).await {
            Ok(entity) => Some(entity.snapshot().await),
            Err(_) => None,
        }
    }

    /// Output log entries newer than `since_seq`.
    pub async fn output(&self, id: &str, since_seq: u64) -> SupervisorResult<Vec<OutputEntry>> {
        Ok(self.entity(id).await?.output_since(since_seq).await)
    }

    /// Write a line to an entity's stdin.
    pub async fn send_input(&self, id: &str, input: &str) -> SupervisorResult<()> {
        self.entity(id).await?.send(input).await
    }

    /// Add a context file to an assistant session.
    pub async fn add_context(&self, id: &str, path: &str) -> SupervisorResult<bool> {
        self.entity(id).await?.add_context(path).await
    }

    /// Remove a context file from an assistant session.
    pub async fn remove_context(&self, id: &str, path: &str) -> SupervisorResult<bool> {
        self.entity(id).await?.remove_context(path).await
    }

    /// Submit a task to a swarm.
    pub async fn submit_task(&self, id: &str, description: &str) -> SupervisorResult<String> {
        self.entity(id).await?.submit_task(description).await
    }

    /// Invoke a tool on a tool server.
    pub async fn call_tool(&self, id: &str, tool: &str, arguments: Value) -> SupervisorResult<Value> {
        let entity = self.entity(id).await?;
        self.catalog.call_tool(&entity, tool, arguments).await
    }

    /// Refresh a tool server's catalog.
    pub async fn discover_tools(&self, id: &str) -> SupervisorResult<Vec<DiscoveredTool>> {
        let entity = self.entity(id).await?;
        Ok(self.catalog.discover(&entity).await)
    }

    /// Refresh a catalog without overlapping a start or stop of the same id.
    async fn rediscover(&self, id: &str) -> SupervisorResult<Vec<DiscoveredTool>> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let entity = self.entity(id).await?;
        if entity.status().await != EntityStatus::Running {
            return Err(SupervisorError::NotRunning(id.to_string()));
        }
        Ok(self.catalog.discover(&entity).await)
    }

    /// Start every enabled entity concurrently.
    ///
    /// Returns the outcome per id, sorted by id.
    pub async fn start_enabled(self: &Arc<Self>) -> SupervisorResult<Vec<(String, SupervisorResult<EntitySnapshot>)>> {
        let mut set = JoinSet::new();
        for id in self.config.entity_ids().await? {
            let enabled = matches!(self.config.entity_config(&id).await?, Some(c) if c.enabled);
            if !enabled {
                continue;
            }
            let supervisor = Arc::clone(self);
            set.spawn(async move {
                let result = supervisor.start(&id).await;
                (id, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Start task failed"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(outcomes)
    }

    /// Stop every registered entity.
    ///
    /// Must be called before the supervisor's own process exits; it is the
    /// only path that guarantees no child process outlives it. Every entity
    /// is attempted; the first failure is returned.
    pub async fn shutdown_all(&self) -> SupervisorResult<()> {
        self.stop_health_monitor();

        let entities: Vec<(String, Arc<Entity>)> = self
            .registry
            .read()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();

        info!(count = entities.len(), "Shutting down all entities");

        let mut set = JoinSet::new();
        for (id, entity) in entities {
            let lock = self.lock_for(&id).await;
            set.spawn(async move {
                let _guard = lock.lock().await;
                (id, entity.stop().await)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => {
                    warn!(entity = %id, error = %e, "Failed to stop entity during shutdown");
                    first_error.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "Shutdown task failed"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Abort the health monitor, if running.
    pub fn stop_health_monitor(&self) {
        if let Ok(mut task) = self.health_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

async fn listen_remote(supervisor: Weak<Supervisor>, mut rx: mpsc::UnboundedReceiver<RemoteMessage>) {
    while let Some(message) = rx.recv().await {
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        if message.notification.method == TOOLS_LIST_CHANGED {
            info!(entity = %message.entity_id, "Tool list changed, refreshing catalog");
            if let Err(e) = supervisor.rediscover(&message.entity_id).await {
                debug!(entity = %message.entity_id, error = %e, "Catalog refresh skipped");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{EntityConfig, StaticConfigSource};
    use crate::store::MemoryStore;

    fn supervisor(ids: &[&str]) -> Arc<Supervisor> {
        let settings = SupervisorSettings {
            stop_grace_ms: 300,
            ..SupervisorSettings::default()
        };
        let entities = ids.iter().map(|id| {
            let config = EntityConfig::stdio(EntityKind::Assistant, "/bin/sh")
                .with_args(["-c", "while read -r line; do echo \"$line\"; done"]);
            (*id, config)
        });
        let config = Arc::new(StaticConfigSource::with_entities(settings.clone(), entities));
        Supervisor::with_settings(config, Arc::new(MemoryStore::new()), settings)
    }

    #[tokio::test]
    async fn test_remove_releases_per_id_lock() {
        let supervisor = supervisor(&["a", "b"]);
        supervisor.start("a").await.unwrap();
        supervisor.start("b").await.unwrap();
        assert_eq!(supervisor.lock_count().await, 2);

        supervisor.remove("a").await.unwrap();
        assert_eq!(supervisor.lock_count().await, 1);
        assert!(supervisor.get("a").await.is_none());

        supervisor.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_rediscover_requires_running_entity() {
        let supervisor = supervisor(&["a"]);
        supervisor.start("a").await.unwrap();
        supervisor.stop("a").await.unwrap();

        let err = supervisor.rediscover("a").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning(_)));
    }
}
