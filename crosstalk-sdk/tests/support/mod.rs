//! In-process relay standing in for the real chat server, plus test helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crosstalk_sdk::{ChatConfig, ChatObserver, ConnectionMode, ConnectionStatus, Message};

// ── Relay ──

pub struct Relay {
    pub state: Arc<RelayState>,
    pub url: String,
    pub server: JoinHandle<anyhow::Result<()>>,
}

#[derive(Default)]
pub struct RelayState {
    /// Relay-side message log served by the history endpoint.
    messages: Mutex<Vec<Value>>,
    /// Bodies of every broadcast POST, in arrival order.
    pub broadcasts: Mutex<Vec<Value>>,
    /// Client metadata headers captured from broadcast requests.
    pub client_headers: Mutex<Vec<(String, String)>>,
    streams: Mutex<Vec<UnboundedSender<Event>>>,

    pub fail_stream: AtomicBool,
    pub fail_broadcast: AtomicBool,
    pub fail_devices: AtomicBool,
    pub fail_suggestions: AtomicBool,
    pub omit_broadcast_id: AtomicBool,

    pub health_hits: AtomicUsize,
    pub seed_hits: AtomicUsize,
    pub poll_hits: AtomicUsize,
    pub stream_conns: AtomicUsize,
}

impl RelayState {
    /// Push a named `message` event to every open stream.
    pub fn push_stream(&self, payload: &Value) {
        let data = payload.to_string();
        self.streams.lock().retain(|tx| {
            tx.send(Event::default().event("message").data(data.clone())).is_ok()
        });
    }

    /// Push a bare data-only frame to every open stream.
    pub fn push_unnamed(&self, payload: &Value) {
        let data = payload.to_string();
        self.streams
            .lock()
            .retain(|tx| tx.send(Event::default().data(data.clone())).is_ok());
    }

    /// Sever every open stream; clients see an orderly end of body.
    pub fn drop_streams(&self) {
        self.streams.lock().clear();
    }

    pub fn open_streams(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn seed_messages(&self, messages: Vec<Value>) {
        *self.messages.lock() = messages;
    }

    pub fn push_message(&self, message: Value) {
        self.messages.lock().push(message);
    }
}

pub async fn start_relay() -> Relay {
    let state = Arc::new(RelayState::default());
    let router = Router::new()
        .route("/chat/health", get(health))
        .route("/chat/stream/{device_id}", get(stream))
        .route("/chat/history/{device_id}", get(history))
        .route("/chat/broadcast", post(broadcast))
        .route("/chat/devices", get(devices))
        .route("/chat/suggestions/{device_id}", post(suggestions))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await?;
        Ok::<_, anyhow::Error>(())
    });

    Relay {
        state,
        url: format!("http://{addr}"),
        server,
    }
}

// ── Handlers ──

async fn health(State(state): State<Arc<RelayState>>) -> Json<Value> {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "status": "ok" }))
}

async fn stream(
    State(state): State<Arc<RelayState>>,
    Path(_device_id): Path<String>,
) -> Response {
    state.stream_conns.fetch_add(1, Ordering::SeqCst);
    if state.fail_stream.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    state.streams.lock().push(tx);

    let connected = stream::once(async {
        Ok::<_, std::convert::Infallible>(Event::default().event("connected").data("{}"))
    });
    let pushed = UnboundedReceiverStream::new(rx).map(Ok);
    Sse::new(connected.chain(pushed))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_millis(500))
                .text("heartbeat"),
        )
        .into_response()
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(
    State(state): State<Arc<RelayState>>,
    Path(_device_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<Value> {
    let all = state.messages.lock().clone();
    match params.limit {
        Some(limit) => {
            state.poll_hits.fetch_add(1, Ordering::SeqCst);
            let start = all.len().saturating_sub(limit);
            Json(json!({ "messages": &all[start..] }))
        }
        None => {
            state.seed_hits.fetch_add(1, Ordering::SeqCst);
            Json(json!({ "messages": all }))
        }
    }
}

async fn broadcast(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    for name in ["x-client-version", "x-client-type"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            state
                .client_headers
                .lock()
                .push((name.to_string(), value.to_string()));
        }
    }
    state.broadcasts.lock().push(body);

    if state.fail_broadcast.load(Ordering::SeqCst) {
        return Json(json!({ "success": false }));
    }
    if state.omit_broadcast_id.load(Ordering::SeqCst) {
        return Json(json!({ "success": true }));
    }
    let id = format!("bc-{}", state.broadcasts.lock().len());
    Json(json!({ "success": true, "broadcastId": id }))
}

async fn devices(State(state): State<Arc<RelayState>>) -> Response {
    if state.fail_devices.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "devices": [{ "deviceId": "relay-fixture", "platform": "test" }]
    }))
    .into_response()
}

async fn suggestions(
    State(state): State<Arc<RelayState>>,
    Path(_device_id): Path<String>,
    Json(_body): Json<Value>,
) -> Response {
    if state.fail_suggestions.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({ "suggestions": ["sounds good", "on my way"] })).into_response()
}

// ── Client-side helpers ──

/// Config tuned for fast tests: tight poll cadence, short backoff base,
/// liveness effectively disabled unless a test opts in.
pub fn test_config(url: &str, state_dir: &std::path::Path) -> ChatConfig {
    ChatConfig {
        server_url: url.to_string(),
        device_prefix: "test".to_string(),
        state_dir: Some(state_dir.to_path_buf()),
        poll_interval: Duration::from_millis(50),
        reconnect_base: Duration::from_millis(25),
        liveness_interval: Duration::from_secs(3600),
        ..ChatConfig::default()
    }
}

/// A relay-side message row shaped like real relay output.
pub fn wire_message(id: &str, content: &str, source: &str, ts_millis: i64) -> Value {
    json!({
        "type": "message",
        "id": id,
        "message": content,
        "sourceDeviceId": source,
        "timestamp": ts_millis,
    })
}

#[derive(Default)]
pub struct RecordingObserver {
    pub messages: Mutex<Vec<Message>>,
    pub history_lens: Mutex<Vec<usize>>,
    pub statuses: Mutex<Vec<ConnectionStatus>>,
}

impl RecordingObserver {
    pub fn contents(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.content.clone()).collect()
    }

    pub fn saw_mode(&self, mode: ConnectionMode) -> bool {
        self.statuses.lock().iter().any(|s| s.mode == mode)
    }

    pub fn last_status(&self) -> Option<ConnectionStatus> {
        self.statuses.lock().last().cloned()
    }
}

impl ChatObserver for RecordingObserver {
    fn on_message(&self, message: &Message) {
        self.messages.lock().push(message.clone());
    }

    fn on_history_changed(&self, history: &[Message]) {
        self.history_lens.lock().push(history.len());
    }

    fn on_connection_status_changed(&self, status: ConnectionStatus) {
        self.statuses.lock().push(status);
    }
}

/// Poll `cond` until it holds or a 5 second deadline passes.
pub async fn wait_for<F>(what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
