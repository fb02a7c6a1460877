//! Client SDK for crosstalk relays.
//!
//! Connects a device to a relay and keeps a live, de-duplicated message
//! history over two transports: a server-push event stream while it holds,
//! polling of the history endpoint when it does not. Transport recovery,
//! ordering, and duplicate suppression all happen inside the connection
//! manager; consumers observe the result through [`ChatObserver`] hooks and
//! drive it through a [`ChatHandle`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crosstalk_sdk::{connect, ChatConfig, LogObserver};
//!
//! # async fn demo() -> Result<(), crosstalk_sdk::ChatError> {
//! let handle = connect(ChatConfig::default(), Arc::new(LogObserver)).await?;
//! handle.send("hello from the desktop").await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod device;
pub mod error;
mod history;
pub mod message;
pub mod observer;
mod sse;

pub use client::{connect, ChatConfig, ChatHandle, StatusSnapshot};
pub use error::ChatError;
pub use message::{Message, MessageKind};
pub use observer::{ChatObserver, ConnectionMode, ConnectionStatus, LogObserver};
