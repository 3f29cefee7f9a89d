//! Configuration for taskboard-watch
//!
//! CLI arguments and environment variable handling using clap.

use std::time::Duration;

use clap::Parser;
use taskboard_client::{ChannelConfig, ClientConfig};

/// Follow taskboard notifications from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "taskboard-watch")]
#[command(about = "Log in to a taskboard backend and stream its notifications")]
pub struct Args {
    /// Base URL of the REST API
    #[arg(long, env = "TASKBOARD_API_URL", default_value = "http://localhost:8000/api")]
    pub api_url: String,

    /// Notification push endpoint
    #[arg(long, env = "TASKBOARD_WS_URL", default_value = "ws://localhost:8000/ws/notifications/")]
    pub ws_url: String,

    #[arg(long, env = "TASKBOARD_USERNAME")]
    pub username: String,

    #[arg(long, env = "TASKBOARD_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Acknowledge every notification as it arrives
    #[arg(long, env = "TASKBOARD_MARK_READ", default_value = "false")]
    pub mark_read: bool,

    /// First reconnection delay; doubles on every attempt
    #[arg(long, env = "RECONNECT_BASE_MS", default_value = "3000")]
    pub reconnect_base_ms: u64,

    #[arg(long, env = "RECONNECT_MAX_ATTEMPTS", default_value = "5")]
    pub reconnect_max_attempts: u32,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Seconds to wait for a challenge answer on stdin
    #[arg(long, env = "CHALLENGE_TIMEOUT_SECS", default_value = "300")]
    pub challenge_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err("TASKBOARD_API_URL must be an http(s) URL".to_string());
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err("TASKBOARD_WS_URL must be a ws(s) URL".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("TASKBOARD_USERNAME must not be empty".to_string());
        }
        if self.reconnect_max_attempts == 0 {
            return Err("RECONNECT_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.reconnect_base_ms == 0 {
            return Err("RECONNECT_BASE_MS must be positive".to_string());
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            challenge_timeout: Duration::from_secs(self.challenge_timeout_secs),
            ..ClientConfig::with_base_url(self.api_url.clone())
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            base_delay: Duration::from_millis(self.reconnect_base_ms),
            max_attempts: self.reconnect_max_attempts,
            ..ChannelConfig::with_ws_url(self.ws_url.clone())
        }
    }
}
