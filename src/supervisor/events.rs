// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Outward events and the bus that delivers them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace, warn};

use crate::entity::EntityStatus;
use crate::process::StreamTag;
use crate::store::PersistenceSink;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Every event the supervisor publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// An entity moved to a new status.
    StatusChanged {
        entity_id: String,
        status: EntityStatus,
        error: Option<String>,
    },
    /// A chunk of process output.
    Output {
        entity_id: String,
        stream: StreamTag,
        text: String,
    },
    /// A tool server's catalog was replaced.
    ToolCatalogUpdated { entity_id: String, tool_count: usize },
}

impl SupervisorEvent {
    /// Id of the entity the event concerns.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::StatusChanged { entity_id, .. }
            | Self::Output { entity_id, .. }
            | Self::ToolCatalogUpdated { entity_id, .. } => entity_id,
        }
    }

    /// Event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::Output { .. } => "output",
            Self::ToolCatalogUpdated { .. } => "tool_catalog_updated",
        }
    }
}

/// Broadcasts [`SupervisorEvent`]s to every subscriber.
///
/// Clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of receivers it reached.
    pub fn publish(&self, event: SupervisorEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                trace!(event_type, receiver_count = count, "Event published");
                count
            }
            Err(_) => {
                trace!(event_type, "No receivers for event");
                0
            }
        }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of an [`EventBus`] subscription.
pub struct EventReceiver {
    receiver: broadcast::Receiver<SupervisorEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Events dropped because this receiver lagged are skipped with a
    /// warning. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SupervisorEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<SupervisorEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Publishes status transitions and remembers the last one per entity.
///
/// Every transition goes to the bus and to the persistence sink. The health
/// monitor uses [`publish_if_changed`](Self::publish_if_changed) so that a
/// poll tick which computes the same status publishes nothing.
pub struct StatusPublisher {
    bus: EventBus,
    store: Arc<dyn PersistenceSink>,
    last: Mutex<HashMap<String, EntityStatus>>,
}

impl StatusPublisher {
    pub fn new(bus: EventBus, store: Arc<dyn PersistenceSink>) -> Self {
        Self {
            bus,
            store,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn PersistenceSink> {
        &self.store
    }

    /// Publish a transition unconditionally.
    pub async fn publish(&self, entity_id: &str, status: EntityStatus, error: Option<String>) {
        self.last
            .lock()
            .await
            .insert(entity_id.to_string(), status);
        self.emit(entity_id, status, error).await;
    }

    /// Publish only if `status` differs from the last published value.
    ///
    /// Returns whether anything was published.
    pub async fn publish_if_changed(
        &self,
        entity_id: &str,
        status: EntityStatus,
        error: Option<String>,
    ) -> bool {
        {
            let mut last = self.last.lock().await;
            if last.get(entity_id) == Some(&status) {
                return false;
            }
            last.insert(entity_id.to_string(), status);
        }
        self.emit(entity_id, status, error).await;
        true
    }

    /// Last published status for an entity.
    pub async fn last_status(&self, entity_id: &str) -> Option<EntityStatus> {
        self.last.lock().await.get(entity_id).copied()
    }

    /// Forget an entity that was removed from the registry.
    pub async fn forget(&self, entity_id: &str) {
        self.last.lock().await.remove(entity_id);
    }

    async fn emit(&self, entity_id: &str, status: EntityStatus, error: Option<String>) {
        debug!(entity = %entity_id, %status, error = ?error, "Status changed");

        if let Err(e) = self
            .store
            .record_status(entity_id, status, error.clone())
            .await
        {
            warn!(entity = %entity_id, error = %e, "Failed to persist status");
        }

        self.bus.publish(SupervisorEvent::StatusChanged {
            entity_id: entity_id.to_string(),
            status,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, MockPersistenceSink};

    #[tokio::test]
    async fn test_bus_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let event = SupervisorEvent::ToolCatalogUpdated {
            entity_id: "fs".to_string(),
            tool_count: 3,
        };
        assert_eq!(bus.publish(event.clone()), 2);

        assert_eq!(a.recv().await, Some(event.clone()));
        assert_eq!(b.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_bus_without_subscribers() {
        let bus = EventBus::new();
        let sent = bus.publish(SupervisorEvent::Output {
            entity_id: "x".to_string(),
            stream: StreamTag::Stdout,
            text: "hi".to_string(),
        });
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_lagged_receiver_skips_ahead() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(SupervisorEvent::ToolCatalogUpdated {
                entity_id: "fs".to_string(),
                tool_count: i,
            });
        }

        match rx.recv().await {
            Some(SupervisorEvent::ToolCatalogUpdated { tool_count, .. }) => assert_eq!(tool_count, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = SupervisorEvent::StatusChanged {
            entity_id: "fs".to_string(),
            status: EntityStatus::Errored,
            error: Some("exit code 1".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["status"], "error");
        assert_eq!(event.entity_id(), "fs");
    }

    #[tokio::test]
    async fn test_publish_if_changed_debounces() {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let publisher = StatusPublisher::new(bus, store.clone());

        assert!(publisher.publish_if_changed("fs", EntityStatus::Running, None).await);
        assert!(!publisher.publish_if_changed("fs", EntityStatus::Running, None).await);
        assert!(
            publisher
                .publish_if_changed("fs", EntityStatus::Errored, Some("gone".to_string()))
                .await
        );

        assert!(matches!(rx.try_recv(), Some(SupervisorEvent::StatusChanged { status: EntityStatus::Running, .. })));
        assert!(matches!(rx.try_recv(), Some(SupervisorEvent::StatusChanged { status: EntityStatus::Errored, .. })));
        assert!(rx.try_recv().is_none());

        assert_eq!(store.status("fs").await.unwrap().0, EntityStatus::Errored);
        assert_eq!(publisher.last_status("fs").await, Some(EntityStatus::Errored));
    }

    #[tokio::test]
    async fn test_store_failure_still_broadcasts() {
        let mut store = MockPersistenceSink::new();
        store
            .expect_record_status()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Unavailable("disk full".to_string())));

        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let publisher = StatusPublisher::new(bus, Arc::new(store));

        publisher.publish("fs", EntityStatus::Stopped, None).await;
        assert!(matches!(
            rx.try_recv(),
            Some(SupervisorEvent::StatusChanged { status: EntityStatus::Stopped, .. })
        ));
    }
}
