//! Server-sent-events wire handling.
//!
//! [`SseParser`] is an incremental frame parser fed raw body chunks as they
//! arrive; it tolerates frames split at arbitrary byte boundaries and CRLF
//! line endings. [`run_stream`] drives one subscription end to end and
//! reports everything to the connection manager as channel events; it never
//! returns an error because a dead stream is a state transition, not a
//! failure.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::client::NetEvent;

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if the frame was named.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// Last seen `id:` field, sticky across frames.
    pub id: Option<String>,
}

/// Incremental parser over the `text/event-stream` format.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, returning every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.take_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Process one complete line; a blank line dispatches the pending frame.
    fn take_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                // Frame without data (bare keepalive); nothing to dispatch.
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseFrame {
                event,
                data,
                id: self.last_id.clone(),
            });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            // "retry" and unknown fields are ignored.
            _ => {}
        }
        None
    }
}

/// Run one event-stream subscription until it dies.
///
/// Emits `StreamOpened` once the relay accepts the request, then a payload
/// event per chat frame. Exactly one `StreamClosed` follows on any kind of
/// termination, refused requests and mid-body errors included.
pub(crate) async fn run_stream(
    api: ApiClient,
    device_id: String,
    epoch: u64,
    events: mpsc::Sender<NetEvent>,
) {
    let resp = match api.open_stream(&device_id).await {
        Ok(resp) => resp,
        Err(e) => {
            let _ = events
                .send(NetEvent::StreamClosed {
                    epoch,
                    reason: e.to_string(),
                })
                .await;
            return;
        }
    };

    let _ = events.send(NetEvent::StreamOpened { epoch }).await;

    let mut parser = SseParser::new();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = events
                    .send(NetEvent::StreamClosed {
                        epoch,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        for frame in parser.feed(&bytes) {
            match frame.event.as_deref() {
                Some("connected") => info!("Connected to chat stream"),
                Some("ping") => debug!("Stream keepalive received"),
                Some("message") | None => {
                    let _ = events
                        .send(NetEvent::StreamPayload {
                            epoch,
                            data: frame.data,
                        })
                        .await;
                }
                Some(other) => debug!(event = other, "Ignoring unknown stream event"),
            }
        }
    }

    let _ = events
        .send(NetEvent::StreamClosed {
            epoch,
            reason: "stream ended".to_string(),
        })
        .await;
}
