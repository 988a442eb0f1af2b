use thiserror::Error;
use url::ParseError;

pub type Result<T, E = ConnectorError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("WebSocket Error: {0}")]
    WebsocketError(String),

    #[error("Max Reconnect Attempts Error: {attempts} of {max} attempts already used")]
    MaxReconnectAttempts { attempts: u32, max: u32 },

    #[error("Configuration Error: Invalid value for '{key}': {message}")]
    ConfigError { key: String, message: String },

    #[error("Connection manager task has stopped")]
    ManagerStopped,

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),
}

impl ConnectorError {
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        ConnectorError::ConfigError {
            key: key.to_string(),
            message: message.into(),
        }
    }
}
