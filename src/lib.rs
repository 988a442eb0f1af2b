pub mod auth;
pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod observer;
pub mod queue;
pub mod types;
pub mod websocket;
pub use error::{ConnectorError, Result};
