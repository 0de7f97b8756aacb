// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool catalog for tool-server entities.

#[allow(clippy::module_inception)]
mod catalog;
pub mod types;

pub use catalog::ToolCatalog;
pub use types::{DiscoveredTool, ToolCallRecord};
