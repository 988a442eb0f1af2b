//! Connection configuration.
//!
//! All values have defaults matching the dashboard's production policy; override
//! them with the `with_*` setters or load them from the environment with
//! [`ConnectionConfig::from_env`].

use crate::error::{ConnectorError, Result};
use std::env;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
pub const DEFAULT_CLIENT_TYPE: &str = "dashboard";

/// Reconnection backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added or removed at random, in `[0, 1)`.
    pub jitter_factor: f64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.3,
            max_attempts: 10,
        }
    }
}

/// Application-level ping/pong policy.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    /// Routing key stamped on outbound messages (tenant, restaurant, ...).
    pub scope: Option<String>,
    pub client_type: String,
    pub client_version: String,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub max_queue_size: usize,
    pub backoff: BackoffConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            scope: None,
            client_type: DEFAULT_CLIENT_TYPE.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Loads the configuration from `REALTIME_*` environment variables.
    ///
    /// `REALTIME_WS_URL` is required; everything else falls back to the defaults.
    pub fn from_env() -> Result<Self> {
        let url = env::var("REALTIME_WS_URL")
            .map_err(|_| ConnectorError::config("REALTIME_WS_URL", "not set"))?;
        let mut config = Self::new(url);

        if let Ok(scope) = env::var("REALTIME_SCOPE") {
            if !scope.is_empty() {
                config.scope = Some(scope);
            }
        }
        if let Ok(client_type) = env::var("REALTIME_CLIENT_TYPE") {
            config.client_type = client_type;
        }
        if let Some(max) = parse_env::<u32>("REALTIME_MAX_RECONNECT_ATTEMPTS")? {
            config.backoff.max_attempts = max;
        }
        if let Some(ms) = parse_env::<u64>("REALTIME_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat.interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the state machine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConnectorError::config(
                "url",
                format!("expected ws:// or wss://, got {}://", url.scheme()),
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter_factor) {
            return Err(ConnectorError::config(
                "backoff.jitter_factor",
                "must be in [0, 1)",
            ));
        }
        if self.backoff.base_delay.is_zero() || self.backoff.max_delay < self.backoff.base_delay {
            return Err(ConnectorError::config(
                "backoff",
                "base_delay must be non-zero and not exceed max_delay",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ConnectorError::config("max_queue_size", "must be > 0"));
        }
        for (key, value) in [
            ("connect_timeout", self.connect_timeout),
            ("auth_timeout", self.auth_timeout),
            ("heartbeat.interval", self.heartbeat.interval),
            ("heartbeat.pong_timeout", self.heartbeat.pong_timeout),
        ] {
            if value.is_zero() {
                return Err(ConnectorError::config(key, "must be non-zero"));
            }
        }
        Ok(())
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_client(mut self, client_type: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self.client_version = version.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConnectorError::config(key, format!("cannot parse '{}'", raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.backoff.max_attempts, 10);
        assert_eq!(config.backoff.max_delay, Duration::from_secs(30));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat.pong_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_scheme() {
        let config = ConnectionConfig::new("https://example.com/ws");
        match config.validate() {
            Err(ConnectorError::ConfigError { key, .. }) => assert_eq!(key, "url"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_jitter_and_queue() {
        let mut config = ConnectionConfig::default();
        config.backoff.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let config = ConnectionConfig::default().with_max_queue_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unparseable_url() {
        let config = ConnectionConfig::new("not a url");
        assert!(matches!(
            config.validate(),
            Err(ConnectorError::UrlParseError(_))
        ));
    }

    #[test]
    fn test_builder_setters() {
        let config = ConnectionConfig::new("wss://rt.example.com/ws")
            .with_scope("restaurant-42")
            .with_client("pos", "2.1.0")
            .with_max_queue_size(5);
        assert_eq!(config.scope.as_deref(), Some("restaurant-42"));
        assert_eq!(config.client_type, "pos");
        assert_eq!(config.client_version, "2.1.0");
        assert_eq!(config.max_queue_size, 5);
    }
}
