//! Observer interface for embedders.
//!
//! The connection manager calls these hooks synchronously from its own task,
//! always after the history mutation they describe. Implementations should
//! hand work off quickly (to a channel, a UI queue) rather than block.

use crate::message::Message;

/// Which transport currently drives inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Disconnected,
    Streaming,
    Polling,
}

/// Snapshot pushed on every connection-state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub mode: ConnectionMode,
    /// Failed stream-open attempts since the last successful open.
    pub reconnect_attempts: u32,
}

/// Hooks invoked by the connection manager.
///
/// Every method has a logging default, so embedders implement only what they
/// render; a hook left out is logged, never an error.
pub trait ChatObserver: Send + Sync {
    /// One newly accepted message (already appended to history).
    fn on_message(&self, message: &Message) {
        tracing::debug!(id = %message.id, content = %message.content, "Message received");
    }

    /// Full history after any change (append or wholesale reload).
    fn on_history_changed(&self, history: &[Message]) {
        tracing::debug!(len = history.len(), "History changed");
    }

    /// Transport mode or connectivity changed.
    fn on_connection_status_changed(&self, status: ConnectionStatus) {
        tracing::debug!(
            connected = status.connected,
            mode = ?status.mode,
            attempts = status.reconnect_attempts,
            "Connection status changed"
        );
    }
}

/// Observer that only logs; for embedders that poll status themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ChatObserver for LogObserver {}
