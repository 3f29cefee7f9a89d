//! Error types for the taskboard client

use serde_json::Value;
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Fallback when an error body carries nothing readable.
pub const GENERIC_ERROR_MESSAGE: &str = "Request failed";

/// Client error types
///
/// Every variant carries owned strings so one failure can be handed to
/// every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the request
    #[error("Server error {status}: {message}")]
    Api { status: u16, message: String },

    /// An anti-abuse challenge was cancelled or left unanswered
    #[error("Challenge required ({question}): {message}")]
    ChallengeRequired {
        status: u16,
        question: String,
        message: String,
    },

    /// Credentials could not be renewed; the session is over
    #[error("Authentication failed: {0}")]
    FatalAuth(String),

    /// Push channel failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Status code of the response behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. }
            | ClientError::ChallengeRequired { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error ended the session.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, ClientError::FatalAuth(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Channel(err.to_string())
    }
}

/// Pull a human-readable message out of an unstructured JSON error body.
///
/// Priority: `detail`, a top-level array, `non_field_errors`, then the first
/// value of the first key when that value is an array.
pub fn extract_message(body: &Value) -> String {
    if let Some(detail) = body.get("detail") {
        if !detail.is_null() {
            return value_text(detail);
        }
    }

    if let Value::Array(items) = body {
        return join_values(items);
    }

    if let Some(Value::Array(items)) = body.get("non_field_errors") {
        return join_values(items);
    }

    if let Value::Object(map) = body {
        if let Some(Value::Array(items)) = map.values().next() {
            return join_values(items);
        }
    }

    GENERIC_ERROR_MESSAGE.to_string()
}

/// Same as [`extract_message`] for a raw body that may not be JSON at all.
pub fn extract_message_from_bytes(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .map(|value| extract_message(&value))
        .unwrap_or_else(|_| GENERIC_ERROR_MESSAGE.to_string())
}

fn join_values(items: &[Value]) -> String {
    items.iter().map(value_text).collect::<Vec<_>>().join(" ")
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
