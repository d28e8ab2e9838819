//! Server-Sent Events (SSE) support for shortlink-service.
//!
//! This module provides one-way server-to-client real-time communication,
//! used by the live-stats fanout surface: clients subscribe to a link's
//! click counter and receive incremental updates without polling.
//!
//! # Features
//!
//! - **One-way streaming**: efficient server-to-client event delivery
//! - **Automatic reconnection**: browser handles reconnects with Last-Event-ID
//! - **Keep-alive**: configurable heartbeat to prevent connection timeouts
//! - **Named events**: support for event types with `event:` field
//! - **Broadcasting**: efficient multi-connection event delivery, scoped per link
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use shortlink_service::prelude::*;
//! use shortlink_service::sse::{Sse, Event, KeepAlive, SseEventExt};
//! use futures::stream::{self, Stream};
//! use std::convert::Infallible;
//!
//! async fn events_handler() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
//!     let stream = stream::repeat_with(|| Event::default().data("heartbeat")).map(Ok);
//!     Sse::new(stream).keep_alive(KeepAlive::default())
//! }
//! ```
//!
//! # Broadcasting to Multiple Connections
//!
//! ```rust,ignore
//! use shortlink_service::sse::{SseBroadcaster, BroadcastMessage};
//! use std::sync::Arc;
//!
//! let broadcaster = Arc::new(SseBroadcaster::new());
//! let mut receiver = broadcaster.subscribe();
//! broadcaster.broadcast(BroadcastMessage::new("New data!"));
//! ```

mod broadcast;
mod config;
mod connection;
mod event;

// Re-exports
pub use broadcast::{BroadcastMessage, BroadcastTarget, SseBroadcaster};
pub use config::SseConfig;
pub use connection::{ConnectionId, SseConnection};
pub use event::{SseEventExt, TypedEvent};

// Re-export axum SSE types for convenience
pub use axum::response::sse::{Event, KeepAlive, Sse};
