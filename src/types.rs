use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// --- Close Codes ---

/// Intentional closure. The only code that does not trigger a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Transport went away without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Server rejected the credentials.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// No `authenticated` reply within the auth timeout.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4002;
/// Transport did not open within the connect timeout.
pub const CLOSE_CONNECT_TIMEOUT: u16 = 4003;
/// No `pong` within the pong deadline.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4004;

// --- Message types recognised by the state machine ---

pub const TYPE_AUTHENTICATE: &str = "authenticate";
pub const TYPE_AUTHENTICATED: &str = "authenticated";
pub const TYPE_AUTH_ERROR: &str = "auth_error";
pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";

// --- Enums ---

/// Authoritative connection status, owned by the connection state machine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Handshake sent, waiting for the server acknowledgement.
    Authenticated,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    /// True while a transport is being dialed or a handshake is outstanding.
    pub fn is_handshaking(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Authenticated
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Authenticated => "authenticated",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// --- Messages ---

/// A single envelope on the wire, in either direction.
///
/// Inbound frames are parsed leniently: only `type` is required.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    /// Builds an outbound message with a fresh id and the current UTC timestamp.
    pub fn new(kind: impl Into<String>, data: Value, scope: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            data,
            scope,
            timestamp: now_iso8601(),
        }
    }

    /// Parses an inbound text frame.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The caller-facing half of a [`Message`]: everything except id and timestamp,
/// which the manager stamps when the message is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub kind: String,
    pub data: Value,
    /// Overrides the manager's configured scope when set.
    pub scope: Option<String>,
}

impl OutgoingMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
