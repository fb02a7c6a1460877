//! Error type for the SDK's fallible surface.
//!
//! Transport failures on the inbound side (stream drop, poll fetch error) are
//! handled internally by the connection manager and never show up here; this
//! enum covers the operations a caller invokes directly.

use thiserror::Error;

/// Errors returned by [`crate::client::ChatHandle`] operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The HTTP request itself failed (connect refused, timeout, bad body).
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay answered with a non-success status code.
    #[error("relay returned status {status}")]
    Api { status: u16 },

    /// The relay acknowledged the broadcast with `success: false`.
    #[error("relay rejected the broadcast")]
    Rejected,

    /// Outbound message was empty or whitespace-only.
    #[error("message is empty")]
    EmptyMessage,

    /// The client has been shut down; the handle is no longer usable.
    #[error("client is shut down")]
    Closed,

    /// Invalid configuration value (bad server URL, bad header value).
    #[error("invalid configuration: {0}")]
    Config(String),
}
