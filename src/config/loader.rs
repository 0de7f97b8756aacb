// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::AgentvisorConfig;

/// Config file names to search for in the working directory (in order).
pub const CONFIG_FILES: &[&str] = &["agentvisor.json", "agentvisor.yaml", ".agentvisor/config.json"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".agentvisor";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR).join(GLOBAL_CONFIG_FILE))
}

/// Find the configuration file for `dir`.
///
/// Searches the workspace files first, then `~/.agentvisor/config.json`.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .chain(get_global_config_path())
        .find(|path| path.exists())
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<AgentvisorConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(path, &content)
}

/// Parse configuration text, choosing the format by file extension.
pub fn parse_config(path: &Path, content: &str) -> Result<AgentvisorConfig, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(content).map_err(ConfigError::from),
        _ => serde_json::from_str(content).map_err(ConfigError::from),
    }
}
