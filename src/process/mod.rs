// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Child process ownership and output retention.

pub mod error;
pub mod handle;
pub mod output;

pub use error::ProcessError;
pub use handle::{ExitInfo, ProcessEvent, ProcessHandle, SpawnSpec, DEFAULT_STOP_GRACE};
pub use output::{OutputEntry, OutputLog, StreamTag, Utf8Decoder, DEFAULT_LOG_CAPACITY};
