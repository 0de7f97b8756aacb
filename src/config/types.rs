// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What kind of process an entity supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// An MCP tool server speaking JSON-RPC.
    #[default]
    ToolServer,
    /// A coding assistant driven through plain-text stdin.
    Assistant,
    /// A multi-agent swarm accepting NDJSON tasks.
    Swarm,
}

impl EntityKind {
    /// Short name used in generated ids and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolServer => "tool_server",
            Self::Assistant => "assistant",
            Self::Swarm => "swarm",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the supervisor talks to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Local child process over piped stdio.
    #[default]
    Stdio,
    /// Network endpoint reached with HTTP POST.
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Configuration for a single supervised entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(default)]
    pub kind: EntityKind,

    #[serde(default)]
    pub transport: TransportKind,

    /// Whether the entity is brought up by `start_enabled` and kept by `reload`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Executable for stdio transport.
    pub command: Option<String>,

    /// Arguments for stdio transport.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overlay (values support `${ENV_VAR}` expansion).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for stdio transport.
    pub cwd: Option<String>,

    /// Endpoint for http transport.
    pub url: Option<String>,

    /// Bearer token for http transport (supports `${ENV_VAR}` expansion).
    pub bearer_token: Option<String>,

    /// Output text that signals an assistant or swarm is ready.
    pub ready_marker: Option<String>,

    /// Overrides the supervisor-wide handshake timeout.
    pub handshake_timeout_ms: Option<u64>,

    /// Overrides the supervisor-wide request timeout.
    pub request_timeout_ms: Option<u64>,

    /// List of enabled tools (if empty, all tools are enabled).
    #[serde(default)]
    pub enabled_tools: Vec<String>,

    /// List of disabled tools.
    #[serde(default)]
    pub disabled_tools: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            kind: EntityKind::default(),
            transport: TransportKind::default(),
            enabled: true,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            bearer_token: None,
            ready_marker: None,
            handshake_timeout_ms: None,
            request_timeout_ms: None,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
        }
    }
}

impl EntityConfig {
    /// Create a stdio configuration of the given kind.
    pub fn stdio(kind: EntityKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Create an http tool-server configuration.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Http,
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Add command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the readiness marker.
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = Some(marker.into());
        self
    }

    /// Set the handshake timeout override.
    pub fn with_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = Some(ms);
        self
    }

    /// Set enabled tools.
    pub fn with_enabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set disabled tools.
    pub fn with_disabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.disabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check if a tool is enabled.
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }

    /// Environment overlay with `${VAR}` references expanded.
    pub fn expanded_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }

    /// Bearer token with `${VAR}` references expanded.
    pub fn expanded_bearer_token(&self) -> Option<String> {
        self.bearer_token.as_deref().map(expand_env_vars)
    }

    /// Handshake timeout, falling back to the supervisor default.
    pub fn handshake_timeout(&self, settings: &SupervisorSettings) -> Duration {
        Duration::from_millis(
            self.handshake_timeout_ms
                .unwrap_or(settings.handshake_timeout_ms),
        )
    }

    /// Request timeout, falling back to the supervisor default.
    pub fn request_timeout(&self, settings: &SupervisorSettings) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(settings.request_timeout_ms))
    }

    /// Check that the fields the transport needs are present.
    pub fn validate(&self, id: &str) -> Result<(), ConfigError> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(ConfigError::MissingField(format!("{}.command", id)));
                }
            }
            TransportKind::Http => {
                if self.kind != EntityKind::ToolServer {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.transport", id),
                        message: format!("http transport is only supported for tool servers, not {}", self.kind),
                    });
                }
                match self.url.as_deref() {
                    None => return Err(ConfigError::MissingField(format!("{}.url", id))),
                    Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("{}.url", id),
                            message: format!("'{}' is not an http(s) URL", url),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

/// Supervisor-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Seconds between health-check passes.
    pub health_check_interval_secs: u64,
    /// Grace period between the graceful and the forceful stop signal.
    pub stop_grace_ms: u64,
    /// Default timeout for a single RPC call.
    pub request_timeout_ms: u64,
    /// Default timeout for the startup handshake.
    pub handshake_timeout_ms: u64,
    /// Output log entries retained per entity.
    pub output_log_capacity: usize,
    /// SQLite database for the persistence sink. In-memory when absent.
    pub database: Option<String>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 60,
            stop_grace_ms: 1500,
            request_timeout_ms: 30_000,
            handshake_timeout_ms: 10_000,
            output_log_capacity: crate::process::DEFAULT_LOG_CAPACITY,
            database: None,
        }
    }
}

impl SupervisorSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Database path with a leading `~` resolved to the home directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        let db = self.database.as_deref()?;
        match db.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
            None => Some(PathBuf::from(db)),
        }
    }
}

/// Complete configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentvisorConfig {
    #[serde(flatten)]
    pub settings: SupervisorSettings,

    /// Entity definitions by id.
    #[serde(default)]
    pub entities: HashMap<String, EntityConfig>,
}

impl AgentvisorConfig {
    /// Validate every entity definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, entity) in &self.entities {
            entity.validate(id)?;
        }
        Ok(())
    }

    /// Ids of enabled entities, sorted.
    pub fn enabled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entities
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string. An unterminated `${` is left
/// as-is.
pub fn expand_env_vars(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + len];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }

    result.push_str(rest);
    result
}
