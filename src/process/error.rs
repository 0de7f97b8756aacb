// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for child process management.

use thiserror::Error;

/// Errors raised by a [`ProcessHandle`](super::ProcessHandle).
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The OS refused to launch the executable.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A standard stream was not piped.
    #[error("Failed to get {0} of spawned process")]
    MissingPipe(&'static str),

    /// The process has already exited.
    #[error("Process is not running")]
    NotRunning,

    /// The process outlived the graceful stop and escalation was not requested.
    #[error("Process {pid:?} did not exit within {grace_ms}ms")]
    StillRunning { pid: Option<u32>, grace_ms: u64 },

    /// The process survived a forceful kill.
    #[error("Process {pid:?} could not be killed")]
    Unkillable { pid: Option<u32> },
}

impl ProcessError {
    /// Check if the executable could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}
