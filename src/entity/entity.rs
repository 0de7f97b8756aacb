// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The supervised entity and its lifecycle state machine.
//!
//! ```text
//! Idle ──start──▶ Starting ──handshake ok──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                    │                          │
//!                    └── handshake fails ──▶ Errored ◀── process exits non-zero
//! ```
//!
//! All state lives behind one mutex. The process reference is taken out of
//! that state by whichever path gets there first (stop, failed handshake,
//! process exit, failed health probe), so exactly one of them publishes the
//! terminal transition for a given process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use super::strategy::{ContextChange, DomainEvent, Handshake, TransportStrategy};
use super::types::{EntitySnapshot, EntityStatus, SwarmTask, TaskStatus};
use crate::config::{EntityConfig, SupervisorSettings, TransportKind};
use crate::error::{SupervisorError, SupervisorResult};
use crate::process::{
    ExitInfo, OutputEntry, OutputLog, ProcessEvent, ProcessHandle, SpawnSpec, StreamTag, Utf8Decoder,
};
use crate::rpc::protocol::initialize_params;
use crate::rpc::{FrameReader, HttpRpcClient, RpcCorrelator, RpcError, RpcNotification};
use crate::supervisor::events::{StatusPublisher, SupervisorEvent};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
#[cfg(feature = "telemetry")]
use std::time::Instant;

/// Upper bound on a liveness probe of a network entity.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A message the remote side sent on its own initiative.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    pub entity_id: String,
    pub notification: RpcNotification,
}

#[derive(Clone)]
enum Transport {
    Process {
        handle: Arc<ProcessHandle>,
        rpc: Option<Arc<RpcCorrelator>>,
    },
    Http(Arc<HttpRpcClient>),
}

impl Transport {
    fn pid(&self) -> Option<u32> {
        match self {
            Self::Process { handle, .. } => handle.pid(),
            Self::Http(_) => None,
        }
    }
}

#[derive(Default)]
struct EntityState {
    status: EntityStatus,
    last_error: Option<String>,
    started_at: Option<chrono::DateTime<Utc>>,
    /// Incremented on every start; tasks tied to an older process compare it.
    generation: u64,
    stop_requested: bool,
    transport: Option<Transport>,
    context_files: Vec<String>,
    tasks: Vec<SwarmTask>,
}

/// State shared with the background tasks of a running process.
struct Shared {
    id: String,
    log: Arc<OutputLog>,
    publisher: Arc<StatusPublisher>,
    remote_tx: mpsc::UnboundedSender<RemoteMessage>,
    state: Mutex<EntityState>,
}

impl Shared {
    /// Move to `status` and announce it. Called with the state lock held so
    /// announcements come out in transition order.
    async fn transition(&self, state: &mut EntityState, status: EntityStatus, error: Option<String>) {
        state.status = status;
        if status == EntityStatus::Errored {
            state.last_error = error.clone();
        }

        let note = match &error {
            Some(e) => format!("status: {} ({})", status, e),
            None => format!("status: {}", status),
        };
        self.log.append(StreamTag::System, note).await;
        self.publisher.publish(&self.id, status, error).await;
    }

    async fn handle_exit(&self, generation: u64, exit: ExitInfo) {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.transport.is_none() {
            debug!(entity = %self.id, %exit, "Exit already accounted for");
            return;
        }
        state.transport = None;

        if state.status == EntityStatus::Starting || (!state.stop_requested && !exit.success()) {
            warn!(entity = %self.id, %exit, "Process exited unexpectedly");
            let message = format!("process exited with {}", exit);
            self.transition(&mut state, EntityStatus::Errored, Some(message))
                .await;
        } else {
            info!(entity = %self.id, %exit, "Process exited");
            self.transition(&mut state, EntityStatus::Stopped, None).await;
        }
    }

    /// Append decoded output to the log and publish it.
    async fn record_output(&self, stream: StreamTag, text: String) {
        if text.is_empty() {
            return;
        }
        self.log.append(stream, text.clone()).await;
        self.publisher.bus().publish(SupervisorEvent::Output {
            entity_id: self.id.clone(),
            stream,
            text,
        });
    }

    async fn apply(&self, event: DomainEvent) {
        match event {
            DomainEvent::TaskUpdate {
                task_id,
                status,
                result,
            } => {
                let mut state = self.state.lock().await;
                match state.tasks.iter_mut().find(|t| t.id == task_id) {
                    Some(task) => {
                        debug!(entity = %self.id, task = %task_id, ?status, "Task update");
                        task.status = status;
                        if result.is_some() {
                            task.result = result;
                        }
                    }
                    None => debug!(entity = %self.id, task = %task_id, "Update for unknown task"),
                }
            }
        }
    }
}

/// Fires once a readiness marker shows up in output.
struct MarkerWatch {
    marker: String,
    window: String,
    ready: oneshot::Sender<()>,
}

impl MarkerWatch {
    fn new(marker: String, ready: oneshot::Sender<()>) -> Self {
        Self {
            marker,
            window: String::new(),
            ready,
        }
    }

    /// Returns true once the marker has been seen, including across chunks.
    fn observe(&mut self, text: &str) -> bool {
        self.window.push_str(text);
        if self.window.contains(&self.marker) {
            return true;
        }

        let keep = self.marker.len();
        if self.window.len() > keep {
            let mut cut = self.window.len() - keep;
            while !self.window.is_char_boundary(cut) {
                cut -= 1;
            }
            self.window.drain(..cut);
        }
        false
    }
}

/// A tool server, assistant session or swarm under supervision.
pub struct Entity {
    shared: Arc<Shared>,
    config: EntityConfig,
    strategy: Arc<dyn TransportStrategy>,
    handshake_timeout: Duration,
    request_timeout: Duration,
    stop_grace: Duration,
}

impl Entity {
    /// Create an idle entity with an empty output log.
    pub fn new(
        id: impl Into<String>,
        config: EntityConfig,
        settings: &SupervisorSettings,
        publisher: Arc<StatusPublisher>,
        remote_tx: mpsc::UnboundedSender<RemoteMessage>,
    ) -> Self {
        let log = Arc::new(OutputLog::new(settings.output_log_capacity));
        Self::with_log(id, config, settings, publisher, remote_tx, log)
    }

    /// Create an idle entity that appends to an existing log, so sequence
    /// numbers keep increasing across restarts.
    pub fn with_log(
        id: impl Into<String>,
        config: EntityConfig,
        settings: &SupervisorSettings,
        publisher: Arc<StatusPublisher>,
        remote_tx: mpsc::UnboundedSender<RemoteMessage>,
        log: Arc<OutputLog>,
    ) -> Self {
        let strategy = super::strategy::strategy_for(config.kind);
        Self {
            shared: Arc::new(Shared {
                id: id.into(),
                log,
                publisher,
                remote_tx,
                state: Mutex::new(EntityState::default()),
            }),
            handshake_timeout: config.handshake_timeout(settings),
            request_timeout: config.request_timeout(settings),
            stop_grace: settings.stop_grace(),
            config,
            strategy,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn status(&self) -> EntityStatus {
        self.shared.state.lock().await.status
    }

    pub async fn last_error(&self) -> Option<String> {
        self.shared.state.lock().await.last_error.clone()
    }

    /// Whether a process or connection is currently held.
    pub async fn has_transport(&self) -> bool {
        self.shared.state.lock().await.transport.is_some()
    }

    /// Public view of the entity.
    pub async fn snapshot(&self) -> EntitySnapshot {
        let state = self.shared.state.lock().await;
        EntitySnapshot {
            id: self.shared.id.clone(),
            kind: self.config.kind,
            transport: self.config.transport,
            status: state.status,
            last_error: state.last_error.clone(),
            pid: state.transport.as_ref().and_then(Transport::pid),
            started_at: state.started_at,
            context_files: state.context_files.clone(),
            tasks: state.tasks.clone(),
        }
    }

    /// The output log, shared with any later instance for the same id.
    pub fn log(&self) -> Arc<OutputLog> {
        Arc::clone(&self.shared.log)
    }

    /// Log entries newer than `since_seq`.
    pub async fn output_since(&self, since_seq: u64) -> Vec<OutputEntry> {
        self.shared.log.since(since_seq).await
    }

    /// The last `n` log entries.
    pub async fn output_tail(&self, n: usize) -> Vec<OutputEntry> {
        self.shared.log.tail(n).await
    }

    /// Start the entity and wait for its handshake.
    pub async fn start(&self) -> SupervisorResult<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let generation = {
            let mut state = self.shared.state.lock().await;
            if !state.status.can_start() {
                return Err(SupervisorError::AlreadyRunning(self.shared.id.clone()));
            }
            state.generation += 1;
            state.stop_requested = false;
            state.started_at = Some(Utc::now());
            state.context_files.clear();
            self.shared
                .transition(&mut state, EntityStatus::Starting, None)
                .await;
            state.generation
        };

        info!(entity = %self.shared.id, kind = %self.config.kind, transport = %self.config.transport, "Starting entity");

        let result = match self.config.transport {
            TransportKind::Stdio => self.start_process(generation).await,
            TransportKind::Http => self.start_http(generation).await,
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("entity.start", start.elapsed());

        result
    }

    async fn start_process(&self, generation: u64) -> SupervisorResult<()> {
        let Some(command) = self.config.command.clone() else {
            let err = SupervisorError::SpawnFailure {
                entity: self.shared.id.clone(),
                message: "no command configured".to_string(),
            };
            self.fail_start(generation, &err).await;
            return Err(err);
        };

        let spec = SpawnSpec {
            program: command,
            args: self.strategy.build_args(&self.config),
            cwd: self.config.cwd.as_ref().map(Into::into),
            env: self.config.expanded_env(),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = match ProcessHandle::spawn(self.shared.id.clone(), &spec, events_tx) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                let err = SupervisorError::spawn(self.shared.id.clone(), &e);
                self.fail_start(generation, &err).await;
                return Err(err);
            }
        };

        let rpc = if self.strategy.speaks_rpc() {
            let (correlator, notifications) =
                RpcCorrelator::new(self.shared.id.clone(), handle.stdin_sender());
            tokio::spawn(forward_notifications(self.shared.clone(), notifications));
            Some(Arc::new(correlator))
        } else {
            None
        };

        let handshake = self.strategy.handshake(&self.config);
        let (ready_tx, ready_rx) = oneshot::channel();
        let marker = match &handshake {
            Handshake::OutputMarker(marker) => Some(MarkerWatch::new(marker.clone(), ready_tx)),
            _ => None,
        };

        let transport = Transport::Process {
            handle: handle.clone(),
            rpc: rpc.clone(),
        };
        if !self.install(generation, transport.clone()).await {
            return self.abort_start(generation, transport).await;
        }

        tokio::spawn(pump(
            self.shared.clone(),
            self.strategy.clone(),
            generation,
            events_rx,
            rpc.clone(),
            marker,
        ));

        let outcome = tokio::select! {
            outcome = self.process_handshake(&handshake, rpc.as_deref(), ready_rx) => outcome,
            exit = handle.wait() => Err(SupervisorError::HandshakeFailed {
                entity: self.shared.id.clone(),
                message: format!("process exited during startup ({})", exit),
            }),
        };

        self.finish_start(generation, outcome).await
    }

    async fn process_handshake(
        &self,
        handshake: &Handshake,
        rpc: Option<&RpcCorrelator>,
        ready_rx: oneshot::Receiver<()>,
    ) -> SupervisorResult<()> {
        match handshake {
            Handshake::Initialize => {
                let rpc = rpc.ok_or_else(|| {
                    SupervisorError::unsupported(self.shared.id.clone(), "initialize")
                })?;
                rpc.call("initialize", initialize_params(), self.handshake_timeout)
                    .await
                    .map_err(|e| self.handshake_error(e))?;
                rpc.notify("notifications/initialized", None)
                    .await
                    .map_err(|e| self.handshake_error(e))?;
                Ok(())
            }
            Handshake::OutputMarker(marker) => {
                match tokio::time::timeout(self.handshake_timeout, ready_rx).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SupervisorError::HandshakeFailed {
                        entity: self.shared.id.clone(),
                        message: format!("output ended before ready marker '{}'", marker),
                    }),
                    Err(_) => Err(SupervisorError::HandshakeTimeout {
                        entity: self.shared.id.clone(),
                        timeout_ms: self.handshake_timeout.as_millis() as u64,
                    }),
                }
            }
            Handshake::Immediate => Ok(()),
        }
    }

    async fn start_http(&self, generation: u64) -> SupervisorResult<()> {
        let Some(url) = self.config.url.clone() else {
            let err = SupervisorError::HandshakeFailed {
                entity: self.shared.id.clone(),
                message: "no url configured".to_string(),
            };
            self.fail_start(generation, &err).await;
            return Err(err);
        };

        let client = Arc::new(HttpRpcClient::new(url, self.config.expanded_bearer_token()));
        let transport = Transport::Http(client.clone());
        if !self.install(generation, transport.clone()).await {
            return self.abort_start(generation, transport).await;
        }

        let outcome = match client
            .call("initialize", initialize_params(), self.handshake_timeout)
            .await
        {
            Ok(_) => {
                if let Err(e) = client.notify("notifications/initialized", None).await {
                    warn!(entity = %self.shared.id, error = %e, "Failed to send initialized notification");
                }
                Ok(())
            }
            Err(e) => Err(self.handshake_error(e)),
        };

        self.finish_start(generation, outcome).await
    }

    fn handshake_error(&self, err: RpcError) -> SupervisorError {
        match err {
            RpcError::Timeout { timeout_ms, .. } => SupervisorError::HandshakeTimeout {
                entity: self.shared.id.clone(),
                timeout_ms,
            },
            other => SupervisorError::HandshakeFailed {
                entity: self.shared.id.clone(),
                message: other.to_string(),
            },
        }
    }

    /// Store the transport unless a stop arrived while spawning.
    async fn install(&self, generation: u64, transport: Transport) -> bool {
        let mut state = self.shared.state.lock().await;
        if state.generation != generation || state.stop_requested {
            return false;
        }
        state.transport = Some(transport);
        true
    }

    async fn abort_start(&self, generation: u64, transport: Transport) -> SupervisorResult<()> {
        debug!(entity = %self.shared.id, "Stop requested during startup");
        let shutdown = self.shutdown_transport(transport).await;

        let mut state = self.shared.state.lock().await;
        if state.generation == generation {
            match &shutdown {
                Ok(()) => {
                    self.shared
                        .transition(&mut state, EntityStatus::Stopped, None)
                        .await
                }
                Err(e) => {
                    self.shared
                        .transition(&mut state, EntityStatus::Errored, Some(e.to_string()))
                        .await
                }
            }
        }

        Err(SupervisorError::HandshakeFailed {
            entity: self.shared.id.clone(),
            message: "stopped during startup".to_string(),
        })
    }

    async fn fail_start(&self, generation: u64, err: &SupervisorError) {
        warn!(entity = %self.shared.id, error = %err, "Start failed");
        let mut state = self.shared.state.lock().await;
        if state.generation == generation && state.status == EntityStatus::Starting {
            self.shared
                .transition(&mut state, EntityStatus::Errored, Some(err.to_string()))
                .await;
        }
    }

    async fn finish_start(&self, generation: u64, outcome: SupervisorResult<()>) -> SupervisorResult<()> {
        let mut state = self.shared.state.lock().await;
        let current = state.generation == generation
            && state.transport.is_some()
            && state.status == EntityStatus::Starting;

        match outcome {
            Ok(()) if current => {
                info!(entity = %self.shared.id, "Entity running");
                self.shared
                    .transition(&mut state, EntityStatus::Running, None)
                    .await;
                Ok(())
            }
            Ok(()) => Err(SupervisorError::HandshakeFailed {
                entity: self.shared.id.clone(),
                message: state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "entity went away during startup".to_string()),
            }),
            Err(err) => {
                warn!(entity = %self.shared.id, error = %err, "Handshake failed");
                if current {
                    let transport = state.transport.take();
                    self.shared
                        .transition(&mut state, EntityStatus::Errored, Some(err.to_string()))
                        .await;
                    drop(state);

                    if let Some(transport) = transport {
                        if let Err(e) = self.shutdown_transport(transport).await {
                            warn!(entity = %self.shared.id, error = %e, "Failed to clean up after handshake");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Stop the entity, escalating to a forceful kill if needed.
    ///
    /// A no-op for entities that hold no process or connection.
    pub async fn stop(&self) -> SupervisorResult<()> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let (generation, transport) = {
            let mut state = self.shared.state.lock().await;
            state.stop_requested = true;
            let Some(transport) = state.transport.take() else {
                return Ok(());
            };
            self.shared
                .transition(&mut state, EntityStatus::Stopping, None)
                .await;
            (state.generation, transport)
        };

        info!(entity = %self.shared.id, "Stopping entity");
        let result = self.shutdown_transport(transport).await;

        {
            let mut state = self.shared.state.lock().await;
            if state.generation == generation {
                match &result {
                    Ok(()) => {
                        self.shared
                            .transition(&mut state, EntityStatus::Stopped, None)
                            .await
                    }
                    Err(e) => {
                        self.shared
                            .transition(&mut state, EntityStatus::Errored, Some(e.to_string()))
                            .await
                    }
                }
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("entity.stop", start.elapsed());

        result
    }

    async fn shutdown_transport(&self, transport: Transport) -> SupervisorResult<()> {
        match transport {
            Transport::Process { handle, rpc } => {
                let result = handle.terminate(true, self.stop_grace).await;
                if let Some(rpc) = rpc {
                    rpc.close("entity stopped").await;
                }
                result
                    .map(|exit| debug!(entity = %self.shared.id, %exit, "Process terminated"))
                    .map_err(|e| SupervisorError::TerminationFailed {
                        entity: self.shared.id.clone(),
                        message: e.to_string(),
                    })
            }
            Transport::Http(client) => {
                client.reset_session().await;
                Ok(())
            }
        }
    }

    async fn running_transport(&self) -> SupervisorResult<Transport> {
        let state = self.shared.state.lock().await;
        match (&state.status, &state.transport) {
            (EntityStatus::Running, Some(transport)) => Ok(transport.clone()),
            _ => Err(SupervisorError::NotRunning(self.shared.id.clone())),
        }
    }

    /// Write a line of input to the process.
    pub async fn send(&self, input: &str) -> SupervisorResult<()> {
        match self.running_transport().await? {
            Transport::Process { handle, .. } => handle
                .write(input)
                .await
                .map_err(|_| SupervisorError::NotRunning(self.shared.id.clone())),
            Transport::Http(_) => Err(SupervisorError::unsupported(self.shared.id.clone(), "send")),
        }
    }

    /// Add a context file. Returns false if it was already present.
    pub async fn add_context(&self, path: &str) -> SupervisorResult<bool> {
        self.change_context(ContextChange::Add, path).await
    }

    /// Remove a context file. Returns false if it was not present.
    pub async fn remove_context(&self, path: &str) -> SupervisorResult<bool> {
        self.change_context(ContextChange::Remove, path).await
    }

    async fn change_context(&self, change: ContextChange, path: &str) -> SupervisorResult<bool> {
        let Some(command) = self.strategy.context_command(change, path) else {
            return Err(SupervisorError::unsupported(self.shared.id.clone(), "context"));
        };

        let mut state = self.shared.state.lock().await;
        let handle = match (&state.status, &state.transport) {
            (EntityStatus::Running, Some(Transport::Process { handle, .. })) => handle.clone(),
            _ => return Err(SupervisorError::NotRunning(self.shared.id.clone())),
        };

        let present = state.context_files.iter().any(|f| f == path);
        match change {
            ContextChange::Add if present => return Ok(false),
            ContextChange::Remove if !present => return Ok(false),
            _ => {}
        }

        handle
            .write(command)
            .await
            .map_err(|_| SupervisorError::NotRunning(self.shared.id.clone()))?;

        match change {
            ContextChange::Add => state.context_files.push(path.to_string()),
            ContextChange::Remove => state.context_files.retain(|f| f != path),
        }
        Ok(true)
    }

    /// Queue a task on a swarm. Returns the task id.
    pub async fn submit_task(&self, description: &str) -> SupervisorResult<String> {
        let task = SwarmTask {
            id: format!("task-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            description: description.to_string(),
            status: TaskStatus::Queued,
            result: None,
            submitted_at: Utc::now(),
        };
        let Some(message) = self.strategy.task_message(&task) else {
            return Err(SupervisorError::unsupported(self.shared.id.clone(), "submit_task"));
        };

        let mut state = self.shared.state.lock().await;
        let handle = match (&state.status, &state.transport) {
            (EntityStatus::Running, Some(Transport::Process { handle, .. })) => handle.clone(),
            _ => return Err(SupervisorError::NotRunning(self.shared.id.clone())),
        };

        handle
            .write(message)
            .await
            .map_err(|_| SupervisorError::NotRunning(self.shared.id.clone()))?;

        let id = task.id.clone();
        state.tasks.push(task);
        Ok(id)
    }

    /// Issue an RPC call. Per-call failures never change the entity status.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> SupervisorResult<Value> {
        let timeout = timeout.unwrap_or(self.request_timeout);
        match self.running_transport().await? {
            Transport::Process { rpc: Some(rpc), .. } => Ok(rpc.call(method, params, timeout).await?),
            Transport::Process { rpc: None, .. } => {
                Err(SupervisorError::unsupported(self.shared.id.clone(), method))
            }
            Transport::Http(client) => Ok(client.call(method, params, timeout).await?),
        }
    }

    /// Check liveness and return the resulting status.
    ///
    /// A process entity is alive while its process has not exited. A network
    /// entity is alive if it answers `ping` (an error response still counts).
    /// A dead entity is moved to `Errored`; nothing is restarted.
    pub async fn health_check(&self) -> (EntityStatus, Option<String>) {
        let (generation, status, transport) = {
            let state = self.shared.state.lock().await;
            (state.generation, state.status, state.transport.clone())
        };

        let failure = match (&status, transport) {
            (EntityStatus::Running, Some(Transport::Process { handle, .. })) => {
                (!handle.is_running()).then(|| "process is no longer running".to_string())
            }
            (EntityStatus::Running, Some(Transport::Http(client))) => {
                let timeout = self.request_timeout.min(HEALTH_PROBE_TIMEOUT);
                match client.call("ping", serde_json::json!({}), timeout).await {
                    Ok(_) | Err(RpcError::Remote { .. }) => None,
                    Err(e) => Some(format!("ping failed: {}", e)),
                }
            }
            _ => None,
        };

        let mut state = self.shared.state.lock().await;
        if let Some(message) = failure {
            if state.generation == generation && state.status == EntityStatus::Running {
                warn!(entity = %self.shared.id, error = %message, "Health check failed");
                state.transport = None;
                self.shared
                    .transition(&mut state, EntityStatus::Errored, Some(message))
                    .await;
            }
        }

        let error = (state.status == EntityStatus::Errored)
            .then(|| state.last_error.clone())
            .flatten();
        (state.status, error)
    }
}

async fn forward_notifications(
    shared: Arc<Shared>,
    mut notifications: mpsc::UnboundedReceiver<RpcNotification>,
) {
    while let Some(notification) = notifications.recv().await {
        debug!(entity = %shared.id, method = %notification.method, "Remote notification");
        let _ = shared.remote_tx.send(RemoteMessage {
            entity_id: shared.id.clone(),
            notification,
        });
    }
}

async fn pump(
    shared: Arc<Shared>,
    strategy: Arc<dyn TransportStrategy>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    rpc: Option<Arc<RpcCorrelator>>,
    mut marker: Option<MarkerWatch>,
) {
    let mut frames = FrameReader::new();
    let mut stdout_text = Utf8Decoder::new();
    let mut stderr_text = Utf8Decoder::new();

    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Output { stream, bytes } => {
                let text = match stream {
                    StreamTag::Stderr => stderr_text.decode(&bytes),
                    _ => stdout_text.decode(&bytes),
                };

                if marker.as_mut().is_some_and(|watch| watch.observe(&text)) {
                    if let Some(watch) = marker.take() {
                        debug!(entity = %shared.id, "Ready marker seen");
                        let _ = watch.ready.send(());
                    }
                }

                if stream == StreamTag::Stdout {
                    for message in frames.feed(&bytes) {
                        match &rpc {
                            Some(rpc) => rpc.dispatch_incoming(message).await,
                            None => {
                                for domain_event in strategy.parse_output(&message) {
                                    shared.apply(domain_event).await;
                                }
                            }
                        }
                    }
                }

                shared.record_output(stream, text).await;
            }
            ProcessEvent::Exited(exit) => {
                shared.record_output(StreamTag::Stdout, stdout_text.finish()).await;
                shared.record_output(StreamTag::Stderr, stderr_text.finish()).await;
                if let Some(rpc) = &rpc {
                    rpc.close(&format!("process exited ({})", exit)).await;
                }
                shared.handle_exit(generation, exit).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_watch_across_chunks() {
        let (tx, _rx) = oneshot::channel();
        let mut watch = MarkerWatch::new("READY>".to_string(), tx);

        assert!(!watch.observe("loading models...\nRE"));
        assert!(!watch.observe("AD"));
        assert!(watch.observe("Y> "));
    }

    #[test]
    fn test_marker_watch_keeps_window_small() {
        let (tx, _rx) = oneshot::channel();
        let mut watch = MarkerWatch::new("ok".to_string(), tx);
        for _ in 0..100 {
            assert!(!watch.observe("ééééé no marker here "));
        }
        assert!(watch.window.len() <= 4);
    }
}
