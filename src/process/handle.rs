// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ownership of one spawned child process.
//!
//! A [`ProcessHandle`] starts four tasks:
//!
//! - a writer draining the stdin channel,
//! - one reader each for stdout and stderr forwarding raw chunks,
//! - a waiter that owns the `Child`, reaps it and publishes the exit.
//!
//! Output and exit are delivered in order on a single
//! [`ProcessEvent`] channel. The waiter drains both readers (bounded) before
//! announcing the exit, so the exit event follows the last output chunk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::ProcessError;
use super::output::StreamTag;

/// Default grace period between the graceful and forceful stop signals.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(1500);

/// How long the waiter waits for readers to drain after exit.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Size of one read from a child pipe.
const READ_CHUNK: usize = 8192;

/// Everything needed to launch a process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overlaid on the supervisor's own environment.
    pub env: HashMap<String, String>,
}

impl SpawnSpec {
    /// Create a spec for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Add command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    /// Set working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set environment overlay.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Exit that could not be observed (wait failed).
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Events produced by a running process, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A raw chunk from stdout or stderr.
    Output { stream: StreamTag, bytes: Vec<u8> },
    /// The process was reaped. Sent exactly once.
    Exited(ExitInfo),
}

/// Handle to one running child process.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    stdin_tx: mpsc::Sender<String>,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    /// Launch `spec` with piped stdio.
    pub fn spawn(
        label: impl Into<String>,
        spec: &SpawnSpec,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Self, ProcessError> {
        let label = label.into();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;
        let pid = child.id();

        info!(entity = %label, pid = ?pid, program = %spec.program, "Spawned process");

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(100);
        tokio::spawn(write_stdin(label.clone(), stdin, stdin_rx));

        let readers = vec![
            tokio::spawn(forward_stream(stdout, StreamTag::Stdout, events.clone())),
            tokio::spawn(forward_stream(stderr, StreamTag::Stderr, events.clone())),
        ];

        let (kill_tx, kill_rx) = mpsc::channel(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(label.clone(), child, kill_rx, exit_tx, readers, events));

        Ok(Self {
            label,
            pid,
            stdin_tx,
            kill_tx,
            exit_rx,
        })
    }

    /// OS process id, if the process had one at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has not been reaped yet.
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit information once reaped.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Sender feeding the stdin writer, for use by an RPC correlator.
    pub fn stdin_sender(&self) -> mpsc::Sender<String> {
        self.stdin_tx.clone()
    }

    /// Write one line to stdin. A trailing newline is added if missing.
    pub async fn write(&self, text: impl Into<String>) -> Result<(), ProcessError> {
        if !self.is_running() {
            return Err(ProcessError::NotRunning);
        }
        self.stdin_tx
            .send(text.into())
            .await
            .map_err(|_| ProcessError::NotRunning)
    }

    /// Wait until the process has been reaped.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.exit_rx.clone();
        let exit = rx
            .wait_for(|exit| exit.is_some())
            .await
            .map(|exit| (*exit).unwrap_or_else(ExitInfo::unknown));
        exit.unwrap_or_else(|_| ExitInfo::unknown())
    }

    /// Stop the process.
    ///
    /// Sends the graceful signal and waits up to `grace`. With `escalate`,
    /// a process still alive after that is killed and waited on for another
    /// `grace`; if it survives that too the error is
    /// [`ProcessError::Unkillable`].
    pub async fn terminate(&self, escalate: bool, grace: Duration) -> Result<ExitInfo, ProcessError> {
        if let Some(exit) = self.exit_info() {
            return Ok(exit);
        }

        debug!(entity = %self.label, pid = ?self.pid, "Sending graceful stop signal");
        self.signal_graceful().await;

        if let Ok(exit) = tokio::time::timeout(grace, self.wait()).await {
            return Ok(exit);
        }

        if !escalate {
            return Err(ProcessError::StillRunning {
                pid: self.pid,
                grace_ms: grace.as_millis() as u64,
            });
        }

        warn!(
            entity = %self.label,
            pid = ?self.pid,
            grace_ms = grace.as_millis() as u64,
            "Process ignored graceful stop, killing"
        );
        let _ = self.kill_tx.try_send(());

        tokio::time::timeout(grace, self.wait())
            .await
            .map_err(|_| ProcessError::Unkillable { pid: self.pid })
    }

    #[cfg(unix)]
    async fn signal_graceful(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.pid {
            Some(pid) => {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!(entity = %self.label, pid, error = %e, "Failed to send SIGTERM");
                }
            }
            None => {
                let _ = self.kill_tx.try_send(());
            }
        }
    }

    #[cfg(not(unix))]
    async fn signal_graceful(&self) {
        let _ = self.kill_tx.try_send(());
    }
}

async fn write_stdin(
    label: String,
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(mut msg) = rx.recv().await {
        if !msg.ends_with('\n') {
            msg.push('\n');
        }
        if stdin.write_all(msg.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
            debug!(entity = %label, "stdin closed");
            break;
        }
    }
}

async fn forward_stream<R>(
    mut reader: R,
    stream: StreamTag,
    events: mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let event = ProcessEvent::Output {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }
    }
}

async fn reap(
    label: String,
    mut child: Child,
    mut kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut kill_open = true;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = kill_rx.recv(), if kill_open => {
                // A closed channel means the handle was dropped: do not leak the child.
                if request.is_none() {
                    kill_open = false;
                }
                if let Err(e) = child.start_kill() {
                    warn!(entity = %label, error = %e, "Failed to kill process");
                }
            }
        }
    };

    let exit = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!(entity = %label, error = %e, "Failed to wait for process");
            ExitInfo::unknown()
        }
    };

    let _ = exit_tx.send(Some(exit));

    for reader in readers {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            debug!(entity = %label, "Output pipe still open after exit");
        }
    }

    info!(entity = %label, %exit, "Process exited");
    let _ = events.send(ProcessEvent::Exited(exit));
}
