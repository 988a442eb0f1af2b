use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::types::{now_iso8601, TYPE_AUTHENTICATE};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};

/// The token and identity the handshake is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub user_id: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

/// Source of the current session token.
///
/// The manager reads it once per `connect()` and never refreshes it itself.
pub trait TokenProvider: Send + Sync + 'static {
    fn credentials(&self) -> Option<Credentials>;
}

/// A token provider whose value is replaced by the session layer after re-login.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    inner: Arc<RwLock<Option<Credentials>>>,
}

impl StaticTokenProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(credentials))),
        }
    }

    pub fn set(&self, credentials: Credentials) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(credentials);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn credentials(&self) -> Option<Credentials> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }
}

#[derive(Serialize, Debug)]
struct AuthenticateMessage<'a> {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    data: serde_json::Value,
    scope: &'a str,
    timestamp: String,
    token: &'a str,
}

/// Builds the `authenticate` frame sent right after the transport opens.
///
/// Missing credentials produce an empty token; the server answers with
/// `auth_error`, which surfaces through the normal auth-failure path.
pub fn build_auth_message(
    credentials: Option<&Credentials>,
    config: &ConnectionConfig,
) -> Result<String> {
    let (token, user_id) = match credentials {
        Some(c) => (c.token.as_str(), c.user_id.as_str()),
        None => ("", ""),
    };
    let msg = AuthenticateMessage {
        id: uuid::Uuid::new_v4().to_string(),
        kind: TYPE_AUTHENTICATE,
        data: json!({
            "user_id": user_id,
            "client_type": config.client_type,
            "client_version": config.client_version,
        }),
        scope: config.scope.as_deref().unwrap_or(""),
        timestamp: now_iso8601(),
        token,
    };
    Ok(serde_json::to_string(&msg)?)
}
