//! Configuration types for Banter.
//!
//! `BanterConfig` is the top-level `banter.toml`. Every section and field
//! has a default, so an empty or partial file is valid.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanterConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://banter.db?mode=rwc".to_string(),
        }
    }
}

/// Credential verification settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret used to verify HS256 access tokens.
    pub jwt_secret: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Per-connection timers and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub auth_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub ai_stream_timeout_secs: u64,
    pub task_cancel_grace_secs: u64,
    pub max_message_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: 30,
            heartbeat_interval_secs: 30,
            ai_stream_timeout_secs: 120,
            task_cancel_grace_secs: 5,
            max_message_length: crate::chat::MAX_MESSAGE_LENGTH,
        }
    }
}

/// Sliding-window admission control for `chat.message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Deny everything when the shared store is down (otherwise fall back to
    /// an in-process window).
    pub fail_closed: bool,
    pub fail_closed_retry_after_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 60,
            fail_closed: true,
            fail_closed_retry_after_secs: 60,
        }
    }
}

/// Completion provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    /// Override for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
    pub default_model: String,
    pub summary_temperature: f64,
    pub summary_max_tokens: u32,
    pub max_attempts: u32,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: crate::chat::DEFAULT_MODEL.to_string(),
            summary_temperature: 0.3,
            summary_max_tokens: 500,
            max_attempts: 4,
            backoff_min_secs: 1,
            backoff_max_secs: 30,
        }
    }
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("summary_temperature", &self.summary_temperature)
            .field("summary_max_tokens", &self.summary_max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_min_secs", &self.backoff_min_secs)
            .field("backoff_max_secs", &self.backoff_max_secs)
            .finish()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Export spans through OpenTelemetry (stdout exporter).
    pub otel: bool,
}
