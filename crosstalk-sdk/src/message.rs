//! Inbound payload decoding and the internal message type.
//!
//! Both transports (event stream and history polling) deliver loosely-shaped
//! JSON objects; the relay has grown several field spellings over time
//! (`message` vs `content`, `id` vs `broadcastId`). Everything is normalized
//! into [`Message`] here, at the transport boundary, so the rest of the
//! client never inspects raw payloads.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::device;

/// How a message entered the local history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Sent by this device and acknowledged by the relay.
    Sent,
    /// Delivered over the live event stream.
    ReceivedStream,
    /// Fetched from the history endpoint (initial load or poll fallback).
    ReceivedPoll,
}

/// A single chat message, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Relay-assigned id, or locally generated when the wire carried none.
    pub id: String,
    pub content: String,
    /// Device that originated the message. Absent on some relay frames.
    pub source_device_id: Option<String>,
    /// Used for relative ordering only, never as wall-clock authority.
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

/// Raw wire shape shared by stream frames and history entries.
///
/// Every field is optional; acceptance is decided by [`WirePayload::has_marker`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WirePayload {
    #[serde(rename = "type")]
    pub tag: Option<String>,
    pub message: Option<String>,
    pub content: Option<String>,
    pub id: Option<String>,
    pub broadcast_id: Option<String>,
    pub source_device_id: Option<String>,
    /// Either an RFC 3339 string or unix milliseconds, depending on endpoint.
    pub timestamp: Option<serde_json::Value>,
}

/// Why a payload was dropped at the decode boundary.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("no recognizable message marker")]
    Unrecognized,
}

impl WirePayload {
    /// A payload is a chat message if it carries an explicit type tag, a
    /// populated content field, or a broadcast id. Keepalives and unrelated
    /// frames fail this check and are discarded upstream.
    pub fn has_marker(&self) -> bool {
        matches!(self.tag.as_deref(), Some("message") | Some("broadcast"))
            || is_populated(&self.message)
            || is_populated(&self.content)
            || is_populated(&self.broadcast_id)
    }

    /// Whether the relay assigned this payload an id, as opposed to one
    /// minted locally during normalization. Only relay ids can witness
    /// duplicate delivery across transports.
    pub fn has_wire_id(&self) -> bool {
        is_populated(&self.id) || is_populated(&self.broadcast_id)
    }
}

impl Message {
    /// Decode a raw JSON value from either transport into a [`Message`].
    pub fn decode(value: serde_json::Value, kind: MessageKind) -> Result<Self, DecodeError> {
        let wire: WirePayload = serde_json::from_value(value)?;
        Self::from_wire(wire, kind)
    }

    /// Normalize an already-deserialized wire payload.
    ///
    /// Content resolution prefers `message` over `content`; the id falls back
    /// from `id` to `broadcastId` to a locally generated one.
    pub fn from_wire(wire: WirePayload, kind: MessageKind) -> Result<Self, DecodeError> {
        if !wire.has_marker() {
            return Err(DecodeError::Unrecognized);
        }

        let content = pick(wire.message, wire.content).unwrap_or_default();
        let id = pick(wire.id, wire.broadcast_id).unwrap_or_else(local_id);
        let timestamp = wire
            .timestamp
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Ok(Message {
            id,
            content,
            source_device_id: wire.source_device_id,
            timestamp,
            kind,
        })
    }
}

/// Generate a local message id in the relay's `{millis}-{suffix}` style.
pub(crate) fn local_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), device::random_suffix())
}

fn is_populated(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}

/// First populated value of an ordered preference pair.
fn pick(first: Option<String>, second: Option<String>) -> Option<String> {
    first.filter(|s| !s.is_empty()).or(second.filter(|s| !s.is_empty()))
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
