//! Client configuration

use std::time::Duration;

use crate::error::{ClientError, Result};

/// Header the backend uses to hand out a rotated access credential.
pub const DEFAULT_PASSIVE_REFRESH_HEADER: &str = "x-new-access-token";

/// Header carrying a challenge answer on resubmission.
pub const DEFAULT_CHALLENGE_ANSWER_HEADER: &str = "x-captcha-answer";

/// Request/response side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every request path is appended to (e.g. `http://localhost:8000/api`)
    pub base_url: String,
    /// Path of the credential renewal endpoint, relative to `base_url`
    pub refresh_path: String,
    /// Response header carrying a passively rotated credential
    pub passive_refresh_header: String,
    /// Request header carrying a challenge answer
    pub challenge_answer_header: String,
    /// Status signalling an expired credential
    pub expired_status: u16,
    /// Status signalling an anti-abuse challenge
    pub challenge_status: u16,
    /// Upper bound on a single renewal exchange
    pub refresh_timeout: Duration,
    /// Upper bound on waiting for a human to answer a challenge
    pub challenge_timeout: Duration,
    /// Per-request timeout for the HTTP transport
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            refresh_path: "/auth/refresh/".to_string(),
            passive_refresh_header: DEFAULT_PASSIVE_REFRESH_HEADER.to_string(),
            challenge_answer_header: DEFAULT_CHALLENGE_ANSWER_HEADER.to_string(),
            expired_status: 401,
            challenge_status: 403,
            refresh_timeout: Duration::from_secs(30),
            challenge_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at a specific API base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Full URL for a request path.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "base_url must be http(s): {}",
                self.base_url
            )));
        }
        if self.passive_refresh_header.is_empty() || self.challenge_answer_header.is_empty() {
            return Err(ClientError::Config("header names must not be empty".into()));
        }
        Ok(())
    }
}

/// Push channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint; the token is appended as a query parameter
    pub ws_url: String,
    /// Delay before the first reconnection attempt
    pub base_delay: Duration,
    /// Reconnection attempts before giving up
    pub max_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000/ws/notifications/".to_string(),
            base_delay: Duration::from_millis(3000),
            max_attempts: 5,
        }
    }
}

impl ChannelConfig {
    pub fn with_ws_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    /// Connection URI for a token. The push protocol has no header channel.
    pub fn url_for_token(&self, token: &str) -> String {
        let separator = if self.ws_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}token={}",
            self.ws_url,
            separator,
            urlencoding::encode(token)
        )
    }
}
