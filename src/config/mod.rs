// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Entities and supervisor settings come from a JSON or YAML file:
//! - Workspace config: agentvisor.json, agentvisor.yaml or .agentvisor/config.json
//! - Global config: ~/.agentvisor/config.json
//!
//! The supervisor reads configuration through the [`ConfigSource`] trait so
//! embedders can supply their own.

mod loader;
mod source;
mod types;

pub use loader::{
    find_config_file, get_global_config_path, load_config_file, parse_config, CONFIG_FILES,
    GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};
pub use source::{ConfigSource, FileConfigSource, StaticConfigSource};
pub use types::{
    expand_env_vars, AgentvisorConfig, EntityConfig, EntityKind, SupervisorSettings, TransportKind,
};
