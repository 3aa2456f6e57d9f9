//! Per-connection session engine.
//!
//! One [`SessionEngine`] owns one duplex connection: in-band auth, frame
//! dispatch, the single-flight chat exchange and the background tasks
//! (auth deadline, heartbeat, summary) that run beside the read loop.
//! The transport is abstracted as a stream of inbound text frames and an
//! [`Outbox`] of outbound frames, so the engine never touches sockets.

mod engine;
mod error;
mod exchange;
mod tasks;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use banter_types::config::{AiConfig, RateLimitConfig, SessionConfig};
use banter_types::protocol::{CloseCode, ServerFrame};

use crate::auth::CredentialValidator;
use crate::chat::repository::ConversationStore;
use crate::llm::client::AiClient;
use crate::llm::token_budget::TokenBudgeter;
use crate::ratelimit::RateLimiter;

pub use engine::SessionEngine;
pub use error::SessionError;

/// Timeouts and limits applied to every connection.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Hard deadline for one streamed exchange.
    pub ai_stream_timeout: Duration,
    pub task_cancel_grace: Duration,
    pub max_message_length: usize,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub summary_temperature: f64,
    pub summary_max_tokens: u32,
}

impl SessionSettings {
    pub fn from_config(session: &SessionConfig, rate_limit: &RateLimitConfig, ai: &AiConfig) -> Self {
        Self {
            auth_timeout: Duration::from_secs(session.auth_timeout_secs),
            heartbeat_interval: Duration::from_secs(session.heartbeat_interval_secs),
            ai_stream_timeout: Duration::from_secs(session.ai_stream_timeout_secs),
            task_cancel_grace: Duration::from_secs(session.task_cancel_grace_secs),
            max_message_length: session.max_message_length,
            rate_limit_max: rate_limit.max_requests,
            rate_limit_window: Duration::from_secs(rate_limit.window_secs),
            summary_temperature: ai.summary_temperature,
            summary_max_tokens: ai.summary_max_tokens,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(
            &SessionConfig::default(),
            &RateLimitConfig::default(),
            &AiConfig::default(),
        )
    }
}

/// Process-wide collaborators shared by every session.
pub struct SessionServices<S, V> {
    pub store: Arc<S>,
    pub validator: Arc<V>,
    pub limiter: Arc<RateLimiter>,
    pub ai: Arc<AiClient>,
    pub budgeter: Arc<TokenBudgeter>,
    pub settings: SessionSettings,
}

impl<S, V> Clone for SessionServices<S, V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            validator: Arc::clone(&self.validator),
            limiter: Arc::clone(&self.limiter),
            ai: Arc::clone(&self.ai),
            budgeter: Arc::clone(&self.budgeter),
            settings: self.settings.clone(),
        }
    }
}

impl<S: ConversationStore, V: CredentialValidator> SessionServices<S, V> {
    pub fn new(
        store: Arc<S>,
        validator: Arc<V>,
        limiter: Arc<RateLimiter>,
        ai: Arc<AiClient>,
        budgeter: Arc<TokenBudgeter>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            validator,
            limiter,
            ai,
            budgeter,
            settings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingAuth,
    Authenticated,
    Closed,
}

/// What the transport writer should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ServerFrame),
    /// Send a close frame with this code and stop writing.
    Close(CloseCode),
}

/// The reply path was dropped by the transport.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox(mpsc::Sender<Outbound>);

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self(tx), rx)
    }

    pub async fn send(&self, frame: ServerFrame) -> Result<(), TransportClosed> {
        self.0
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| TransportClosed)
    }

    pub async fn close(&self, code: CloseCode) -> Result<(), TransportClosed> {
        self.0
            .send(Outbound::Close(code))
            .await
            .map_err(|_| TransportClosed)
    }
}
