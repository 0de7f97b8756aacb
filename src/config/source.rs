// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration sources consulted by the supervisor.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ConfigError;

use super::loader::parse_config;
use super::types::{AgentvisorConfig, EntityConfig, SupervisorSettings};

/// Provides per-entity configuration.
///
/// Implementations are consulted on every `start` and `reload`, so edits
/// become visible without rebuilding the supervisor.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Supervisor-wide settings.
    async fn settings(&self) -> Result<SupervisorSettings, ConfigError>;

    /// Every configured entity id, sorted.
    async fn entity_ids(&self) -> Result<Vec<String>, ConfigError>;

    /// Configuration for one entity, or `None` if it is not configured.
    async fn entity_config(&self, id: &str) -> Result<Option<EntityConfig>, ConfigError>;
}

/// Reads a JSON or YAML file on every call.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn load(&self) -> Result<AgentvisorConfig, ConfigError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        parse_config(&self.path, &content)
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn settings(&self) -> Result<SupervisorSettings, ConfigError> {
        Ok(self.load().await?.settings)
    }

    async fn entity_ids(&self) -> Result<Vec<String>, ConfigError> {
        let mut ids: Vec<String> = self.load().await?.entities.into_keys().collect();
        ids.sort();
        Ok(ids)
    }

    async fn entity_config(&self, id: &str) -> Result<Option<EntityConfig>, ConfigError> {
        Ok(self.load().await?.entities.remove(id))
    }
}

/// In-memory configuration that can be edited at runtime.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    config: RwLock<AgentvisorConfig>,
}

impl StaticConfigSource {
    pub fn new(config: AgentvisorConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Create a source with the given settings and entities.
    pub fn with_entities(
        settings: SupervisorSettings,
        entities: impl IntoIterator<Item = (impl Into<String>, EntityConfig)>,
    ) -> Self {
        Self::new(AgentvisorConfig {
            settings,
            entities: entities.into_iter().map(|(id, c)| (id.into(), c)).collect(),
        })
    }

    /// Add or replace an entity definition.
    pub async fn insert(&self, id: impl Into<String>, config: EntityConfig) {
        self.config.write().await.entities.insert(id.into(), config);
    }

    /// Remove an entity definition.
    pub async fn remove(&self, id: &str) -> Option<EntityConfig> {
        self.config.write().await.entities.remove(id)
    }

    /// Flip the enabled flag of an entity. Returns false if it is unknown.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.config.write().await.entities.get_mut(id) {
            Some(entity) => {
                entity.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn settings(&self) -> Result<SupervisorSettings, ConfigError> {
        Ok(self.config.read().await.settings.clone())
    }

    async fn entity_ids(&self) -> Result<Vec<String>, ConfigError> {
        let mut ids: Vec<String> = self.config.read().await.entities.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn entity_config(&self, id: &str) -> Result<Option<EntityConfig>, ConfigError> {
        Ok(self.config.read().await.entities.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntityKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_source_rereads_on_every_call() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agentvisor.json");
        std::fs::write(&path, r#"{"entities": {"a": {"command": "a"}}}"#).unwrap();

        let source = FileConfigSource::new(&path);
        assert_eq!(source.entity_ids().await.unwrap(), vec!["a".to_string()]);

        std::fs::write(
            &path,
            r#"{"entities": {"a": {"command": "a", "enabled": false}, "b": {"command": "b"}}}"#,
        )
        .unwrap();

        assert_eq!(source.entity_ids().await.unwrap().len(), 2);
        let a = source.entity_config("a").await.unwrap().unwrap();
        assert!(!a.enabled);
        assert!(source.entity_config("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_source_edits() {
        let source = StaticConfigSource::default();
        source
            .insert("s", EntityConfig::stdio(EntityKind::Swarm, "swarm"))
            .await;

        assert!(source.set_enabled("s", false).await);
        assert!(!source.set_enabled("unknown", false).await);
        assert!(!source.entity_config("s").await.unwrap().unwrap().enabled);

        source.remove("s").await;
        assert!(source.entity_ids().await.unwrap().is_empty());
    }
}
