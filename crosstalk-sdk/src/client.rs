//! The connection manager.
//!
//! This is the main entry point for SDK consumers. One spawned task owns all
//! client state (history, transport mode, timers); commands from
//! [`ChatHandle`] and events from the network tasks are serialized through
//! it, so there is no locking anywhere on the message path.
//!
//! ## Transports
//!
//! The primary inbound channel is a server-push event stream. When it dies,
//! polling of the history endpoint starts immediately as a fallback while
//! stream reconnects are scheduled with exponential backoff
//! (`base * 2^attempts`, capped at a configured attempt count). The polling
//! fallback has no attempt cap; it is the degraded-but-working path. A
//! liveness timer re-tries the stream on a fixed interval whenever the client
//! is not connected, backoff budget or not.
//!
//! ## Shutdown
//!
//! [`ChatHandle::shutdown`] is idempotent and synchronous from the caller's
//! point of view: when it resolves, every timer is disarmed, the stream
//! reader is gone, and no observer hook can fire again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::device;
use crate::error::ChatError;
use crate::history::History;
use crate::message::{Message, MessageKind, WirePayload};
use crate::observer::{ChatObserver, ConnectionMode, ConnectionStatus};
use crate::sse;

// ── Configuration ──

/// Configuration for a relay connection, built once at the entry point.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Relay base URL.
    pub server_url: String,
    /// Client identification sent in the `x-client-type` header.
    pub client_type: String,
    /// Prefix for a freshly minted device id.
    pub device_prefix: String,
    /// Directory holding the persisted device id (platform data dir if unset).
    pub state_dir: Option<PathBuf>,
    /// Most recent messages kept in memory.
    pub history_cap: usize,
    /// Cadence of the polling fallback.
    pub poll_interval: Duration,
    /// `limit` query parameter for poll delta fetches.
    pub poll_limit: u32,
    /// First reconnect delay; doubles per failed attempt.
    pub reconnect_base: Duration,
    /// Scheduled reconnects stop after this many consecutive failures.
    pub max_reconnect_attempts: u32,
    /// Cadence of the connected-flag liveness check.
    pub liveness_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3333".to_string(),
            client_type: "desktop".to_string(),
            device_prefix: "desktop".to_string(),
            state_dir: None,
            history_cap: 100,
            poll_interval: Duration::from_secs(2),
            poll_limit: 10,
            reconnect_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            liveness_interval: Duration::from_secs(30),
        }
    }
}

/// Point-in-time client state, answered by [`ChatHandle::status`].
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub mode: ConnectionMode,
    pub device_id: String,
    pub message_count: usize,
    pub reconnect_attempts: u32,
}

#[derive(Debug)]
enum Command {
    RecordSent { id: String, content: String },
    Status { reply: oneshot::Sender<StatusSnapshot> },
    SetForeground { foreground: bool },
    Reconnect,
    Shutdown { done: oneshot::Sender<()> },
}

/// Events fed to the actor by network tasks.
///
/// Stream and poll events carry the epoch under which their task was
/// spawned; the actor drops anything from an older epoch, so an aborted
/// transport can never mutate state after teardown. The one-shot history
/// seed is exempt from the fence: stream churn between its spawn and its
/// arrival must not throw the backlog away.
#[derive(Debug)]
pub(crate) enum NetEvent {
    StreamOpened { epoch: u64 },
    StreamPayload { epoch: u64, data: String },
    StreamClosed { epoch: u64, reason: String },
    PollBatch { epoch: u64, messages: Vec<serde_json::Value> },
    Seed { messages: Vec<serde_json::Value> },
}

// ── Handle ──

/// A handle to a running chat client. Cheap to clone.
#[derive(Clone)]
pub struct ChatHandle {
    cmd_tx: mpsc::Sender<Command>,
    api: ApiClient,
    device_id: String,
}

impl ChatHandle {
    /// The durable identity this client tags outbound messages with.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Broadcast one message to the relay.
    ///
    /// On acknowledgement an optimistic local copy is recorded (the relay
    /// never echoes a device's own messages back). Returns the broadcast id.
    /// Failures are reported to the caller and never retried automatically.
    /// After shutdown this fails with [`ChatError::Closed`] without touching
    /// the relay.
    pub async fn send(&self, content: &str) -> Result<String, ChatError> {
        if self.cmd_tx.is_closed() {
            return Err(ChatError::Closed);
        }
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let ack = self.api.broadcast(content, &self.device_id).await?;
        if !ack.success {
            return Err(ChatError::Rejected);
        }
        let id = ack.broadcast_id.unwrap_or_else(crate::message::local_id);
        self.cmd_tx
            .send(Command::RecordSent {
                id: id.clone(),
                content: content.to_string(),
            })
            .await
            .map_err(|_| ChatError::Closed)?;
        Ok(id)
    }

    /// Current connection state and history size.
    pub async fn status(&self) -> Result<StatusSnapshot, ChatError> {
        let (reply, answer) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| ChatError::Closed)?;
        answer.await.map_err(|_| ChatError::Closed)
    }

    /// Foreground/background signal from the embedding environment.
    ///
    /// Backgrounding tears the event stream down (polling, if already the
    /// active fallback, keeps running); foregrounding reopens the stream.
    /// A no-op after shutdown.
    pub async fn set_foreground(&self, foreground: bool) {
        let _ = self.cmd_tx.send(Command::SetForeground { foreground }).await;
    }

    /// Ask for an immediate stream open, ignoring any backoff schedule.
    pub async fn reconnect_now(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect).await;
    }

    /// Connected devices as reported by the relay.
    /// Degrades to an empty list on any failure.
    pub async fn devices(&self) -> Vec<serde_json::Value> {
        match self.api.devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Device list unavailable");
                Vec::new()
            }
        }
    }

    /// Reply suggestions for this device.
    /// Degrades to an empty list on any failure.
    pub async fn suggestions(&self, context: &str) -> Vec<String> {
        match self.api.suggestions(&self.device_id, context).await {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(error = %e, "Suggestions unavailable");
                Vec::new()
            }
        }
    }

    /// Stop the client: abort the stream, disarm every timer, end the actor.
    ///
    /// Resolves once the actor has exited, after which no observer hook will
    /// fire. Safe to call any number of times.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown { done }).await.is_ok() {
            let _ = finished.await;
        }
    }
}

/// Connect to a relay and spawn the connection manager.
///
/// Probes `/chat/health` once (failure is logged, not fatal), then starts the
/// event stream and schedules the initial history load. The returned handle
/// is usable immediately; watch [`ChatObserver::on_connection_status_changed`]
/// for the streaming/polling transitions.
pub async fn connect(
    config: ChatConfig,
    observer: Arc<dyn ChatObserver>,
) -> Result<ChatHandle, ChatError> {
    let device_id = device::load_or_create(config.state_dir.as_deref(), &config.device_prefix);
    let api = ApiClient::new(&config.server_url, &config.client_type)?;

    match api.health().await {
        Ok(health) => info!(status = %health.status, "Relay reachable"),
        Err(e) => warn!(error = %e, "Relay health check failed, continuing"),
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (net_tx, net_rx) = mpsc::channel(256);

    let handle = ChatHandle {
        cmd_tx,
        api: api.clone(),
        device_id: device_id.clone(),
    };

    let actor = ChatActor {
        history: History::new(config.history_cap),
        config,
        api,
        device_id,
        observer,
        cmd_rx,
        net_tx,
        net_rx,
        connected: false,
        mode: ConnectionMode::Disconnected,
        reconnect_attempts: 0,
        epoch: 0,
        stream_task: None,
        reconnect_at: None,
        poll_at: None,
        liveness_at: None,
    };
    tokio::spawn(actor.run());

    Ok(handle)
}

// ── Actor ──

struct ChatActor {
    config: ChatConfig,
    api: ApiClient,
    device_id: String,
    observer: Arc<dyn ChatObserver>,
    history: History,

    cmd_rx: mpsc::Receiver<Command>,
    net_tx: mpsc::Sender<NetEvent>,
    net_rx: mpsc::Receiver<NetEvent>,

    connected: bool,
    mode: ConnectionMode,
    reconnect_attempts: u32,
    /// Bumped on every stream open and teardown; stale-event fence.
    epoch: u64,
    stream_task: Option<JoinHandle<()>>,

    reconnect_at: Option<Instant>,
    poll_at: Option<Instant>,
    liveness_at: Option<Instant>,
}

/// Scheduled delay before reconnect attempt `attempts + 1`.
fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base * 2u32.saturating_pow(attempts)
}

/// Sleep until an armed deadline; an unarmed one never fires.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl ChatActor {
    async fn run(mut self) {
        self.liveness_at = Some(Instant::now() + self.config.liveness_interval);
        self.open_stream();
        self.spawn_seed();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let keep_running = match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        // All handles dropped: same as an explicit shutdown.
                        None => {
                            self.shutdown();
                            false
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some(event) = self.net_rx.recv() => self.handle_net(event),
                _ = deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    debug!("Backoff timer fired, retrying event stream");
                    self.open_stream();
                }
                _ = deadline(self.poll_at) => {
                    self.poll_at = Some(Instant::now() + self.config.poll_interval);
                    self.spawn_poll();
                }
                _ = deadline(self.liveness_at) => {
                    self.liveness_at = Some(Instant::now() + self.config.liveness_interval);
                    self.liveness_tick();
                }
            }
        }
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::RecordSent { id, content } => {
                self.record_sent(id, content);
                true
            }
            Command::Status { reply } => {
                let _ = reply.send(self.snapshot());
                true
            }
            Command::SetForeground { foreground } => {
                self.set_foreground(foreground);
                true
            }
            Command::Reconnect => {
                info!("Manual reconnect requested");
                self.open_stream();
                true
            }
            Command::Shutdown { done } => {
                // Close the command side first: once the ack lands, every
                // handle observes the channel as closed.
                self.cmd_rx.close();
                self.shutdown();
                let _ = done.send(());
                false
            }
        }
    }

    fn handle_net(&mut self, event: NetEvent) {
        match event {
            NetEvent::StreamOpened { epoch } if epoch == self.epoch => self.on_stream_opened(),
            NetEvent::StreamPayload { epoch, data } if epoch == self.epoch => {
                self.on_stream_payload(&data)
            }
            NetEvent::StreamClosed { epoch, reason } if epoch == self.epoch => {
                self.on_stream_closed(&reason)
            }
            NetEvent::PollBatch { epoch, messages } if epoch == self.epoch => {
                self.on_poll_batch(messages)
            }
            NetEvent::Seed { messages } => self.on_seed(messages),
            stale => debug!(event = ?stale, "Dropping event from torn-down transport"),
        }
    }

    // ── Stream lifecycle ──

    /// Start the event stream unless one is already connecting or connected.
    fn open_stream(&mut self) {
        if self.stream_task.is_some() {
            return;
        }
        self.epoch += 1;
        debug!(epoch = self.epoch, "Opening event stream");
        self.stream_task = Some(tokio::spawn(sse::run_stream(
            self.api.clone(),
            self.device_id.clone(),
            self.epoch,
            self.net_tx.clone(),
        )));
    }

    /// Abort the reader and fence off any of its in-flight events.
    fn teardown_stream(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        self.epoch += 1;
    }

    fn on_stream_opened(&mut self) {
        info!(device_id = %self.device_id, "Event stream connected");
        self.connected = true;
        self.mode = ConnectionMode::Streaming;
        self.reconnect_attempts = 0;
        self.reconnect_at = None;
        self.poll_at = None;
        self.notify_status();
    }

    fn on_stream_closed(&mut self, reason: &str) {
        self.stream_task = None;
        self.connected = false;
        warn!(reason, "Event stream lost, falling back to polling");
        self.mode = ConnectionMode::Polling;
        if self.poll_at.is_none() {
            self.poll_at = Some(Instant::now() + self.config.poll_interval);
        }
        self.schedule_reconnect();
        self.notify_status();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            error!(
                attempts = self.reconnect_attempts,
                "Reconnect budget exhausted, staying on polling fallback"
            );
            return;
        }
        let delay = backoff_delay(self.config.reconnect_base, self.reconnect_attempts);
        self.reconnect_attempts += 1;
        info!(
            attempt = self.reconnect_attempts,
            max = self.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling stream reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn set_foreground(&mut self, foreground: bool) {
        if foreground {
            info!("Foregrounded, reopening event stream");
            self.open_stream();
        } else {
            info!("Backgrounded, closing event stream");
            self.teardown_stream();
            self.reconnect_at = None;
            if self.mode == ConnectionMode::Streaming {
                self.mode = ConnectionMode::Disconnected;
            }
            self.connected = false;
            self.notify_status();
        }
    }

    /// The interval inspects only the logical connected flag; the health
    /// endpoint is probed once, at [`connect`].
    fn liveness_tick(&mut self) {
        if !self.connected {
            debug!("Liveness check found client offline, retrying event stream");
            self.open_stream();
        }
    }

    fn shutdown(&mut self) {
        self.teardown_stream();
        self.reconnect_at = None;
        self.poll_at = None;
        self.liveness_at = None;
        self.connected = false;
        self.mode = ConnectionMode::Disconnected;
        info!("Chat client shut down");
        self.notify_status();
    }

    // ── Polling and history ──

    fn spawn_poll(&self) {
        let api = self.api.clone();
        let device_id = self.device_id.clone();
        let events = self.net_tx.clone();
        let epoch = self.epoch;
        let limit = self.config.poll_limit;
        tokio::spawn(async move {
            match api.history(&device_id, Some(limit)).await {
                Ok(messages) => {
                    let _ = events.send(NetEvent::PollBatch { epoch, messages }).await;
                }
                Err(e) => warn!(error = %e, "Poll fetch failed"),
            }
        });
    }

    fn spawn_seed(&self) {
        let api = self.api.clone();
        let device_id = self.device_id.clone();
        let events = self.net_tx.clone();
        tokio::spawn(async move {
            match api.history(&device_id, None).await {
                Ok(messages) => {
                    let _ = events.send(NetEvent::Seed { messages }).await;
                }
                Err(e) => warn!(error = %e, "Can't load message history"),
            }
        });
    }

    fn on_stream_payload(&mut self, data: &str) {
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Dropping undecodable stream frame");
                return;
            }
        };
        match Message::decode(value, MessageKind::ReceivedStream) {
            Ok(message) => self.accept(message),
            Err(e) => debug!(error = %e, "Dropping unrecognized stream payload"),
        }
    }

    fn on_poll_batch(&mut self, messages: Vec<serde_json::Value>) {
        for value in messages {
            let wire: WirePayload = match serde_json::from_value(value) {
                Ok(wire) => wire,
                Err(e) => {
                    debug!(error = %e, "Dropping malformed poll entry");
                    continue;
                }
            };
            let has_wire_id = wire.has_wire_id();
            let message = match Message::from_wire(wire, MessageKind::ReceivedPoll) {
                Ok(message) => message,
                Err(e) => {
                    debug!(error = %e, "Dropping unrecognized poll entry");
                    continue;
                }
            };
            if !self.history.admits_from_poll(&message, has_wire_id) {
                continue;
            }
            self.accept(message);
        }
    }

    fn on_seed(&mut self, messages: Vec<serde_json::Value>) {
        let mut seeded = Vec::with_capacity(messages.len());
        for value in messages {
            match Message::decode(value, MessageKind::ReceivedPoll) {
                Ok(message) => seeded.push(message),
                Err(e) => debug!(error = %e, "Dropping unrecognized history entry"),
            }
        }
        info!(count = seeded.len(), "Loaded message history");
        self.history.replace(seeded);
        self.observer.on_history_changed(self.history.entries());
    }

    /// Inbound reducer: self-echo filter, id de-duplication, append, notify.
    fn accept(&mut self, message: Message) {
        if message.source_device_id.as_deref() == Some(self.device_id.as_str()) {
            debug!(id = %message.id, "Skipping own message echo");
            return;
        }
        if !self.history.push(message.clone()) {
            debug!(id = %message.id, "Skipping duplicate message");
            return;
        }
        self.observer.on_message(&message);
        self.observer.on_history_changed(self.history.entries());
    }

    fn record_sent(&mut self, id: String, content: String) {
        let message = Message {
            id,
            content,
            source_device_id: Some(self.device_id.clone()),
            timestamp: Utc::now(),
            kind: MessageKind::Sent,
        };
        if self.history.push(message.clone()) {
            self.observer.on_message(&message);
            self.observer.on_history_changed(self.history.entries());
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.connected,
            mode: self.mode,
            device_id: self.device_id.clone(),
            message_count: self.history.len(),
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    fn notify_status(&self) {
        self.observer.on_connection_status_changed(ConnectionStatus {
            connected: self.connected,
            mode: self.mode,
            reconnect_attempts: self.reconnect_attempts,
        });
    }
}
