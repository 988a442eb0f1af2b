//! Self-healing WebSocket connection to a real-time event stream.
//!
//! This module provides the connection manager used by dashboard and POS clients
//! to hold one authenticated channel to the backend:
//!
//! - [`ConnectionManager`]: the connection state machine and its public handle
//! - [`WsConnector`]: the tokio-tungstenite transport it dials by default
//! - [`Connector`] / [`Transport`]: the seam for plugging in other transports
//!
//! # Architecture
//!
//! A single background task owns the socket and every timer. It provides:
//!
//! - Token handshake right after the socket opens
//! - Application-level ping/pong liveness checks
//! - Exponential backoff reconnection with jitter
//! - Queuing of outbound messages while not connected
//! - Typed lifecycle events for UI consumers
//!
//! # Usage
//!
//! ```no_run
//! use realtime_connector_rs::auth::{Credentials, StaticTokenProvider};
//! use realtime_connector_rs::config::ConnectionConfig;
//! use realtime_connector_rs::events::{ConnectionEvent, EventKind, EventSource};
//! use realtime_connector_rs::types::OutgoingMessage;
//! use realtime_connector_rs::websocket::{ConnectionManager, WsConnector};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ConnectionConfig::new("wss://realtime.example.com/ws")
//!         .with_scope("restaurant-42");
//!     let tokens = StaticTokenProvider::new(Credentials::new("session-token", "user-1"));
//!
//!     let manager = ConnectionManager::new(
//!         config.clone(),
//!         Arc::new(WsConnector::from_config(&config)),
//!         Arc::new(tokens),
//!     )
//!     .expect("Invalid configuration");
//!
//!     manager.on(EventKind::Connect, Arc::new(|_e: &ConnectionEvent| println!("Connected")));
//!     manager.on(
//!         EventKind::message("order_update"),
//!         Arc::new(|e: &ConnectionEvent| println!("Received: {:?}", e)),
//!     );
//!
//!     manager.connect().expect("Manager stopped");
//!     manager
//!         .send(OutgoingMessage::new("subscribe", json!({ "topic": "orders" })))
//!         .expect("Manager stopped");
//!
//!     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
//!     manager.disconnect().ok();
//! }
//! ```
//!
//! # Reconnection Behavior
//!
//! - Close code 1000 and [`ConnectionManager::disconnect`] are final: no retry
//! - Any other close, a connect timeout or a missed pong schedules a retry after
//!   `min(base * 2^attempt, max)` ± jitter (defaults 1s, 30s, 30%)
//! - After `max_attempts` (default 10) retries the manager emits
//!   `MaxReconnectAttempts` and waits for [`ConnectionManager::reconnect`]
//! - A rejected or timed-out handshake is never retried with the same token;
//!   the manager emits `AuthError` and waits for a manual reconnect
//!
//! # Message Handling
//!
//! Handlers run on the connection task. They should be quick and must not
//! block; a panicking handler is logged and does not affect other handlers.

pub mod client;
pub mod manager;
pub mod transport;

// Re-export the main types for easier access
pub use client::{WsConnector, WsTransport};
pub use manager::{ConnectionManager, ConnectionSnapshot};
pub use transport::{Connector, Transport, TransportEvent, TransportSink};
