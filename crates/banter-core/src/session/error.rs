//! Session-level failures and how each one reaches the client.

use tracing::{debug, error, warn};

use banter_types::error::{AuthError, RepositoryError};
use banter_types::llm::AiServiceError;
use banter_types::protocol::{CloseCode, ErrorCode, FrameError, ServerFrame};

use crate::chat::content::ContentError;

use super::TransportClosed;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),

    #[error("auth frame carried no token")]
    MissingToken,

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("authentication deadline elapsed")]
    AuthTimeout,

    #[error("conversation not found")]
    NotFound,

    #[error("frame sent before authentication")]
    AuthRequired,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("no active conversation")]
    NoConversation,

    #[error("rate limited for {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("an exchange is already in flight")]
    AlreadyProcessing,

    #[error(transparent)]
    Validation(#[from] ContentError),

    #[error("AI stream deadline elapsed")]
    AiTimeout,

    #[error(transparent)]
    AiService(#[from] AiServiceError),

    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),

    #[error(transparent)]
    Connection(#[from] TransportClosed),

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            SessionError::Protocol(_) => ErrorCode::InvalidJson,
            SessionError::MissingToken | SessionError::Auth(_) => ErrorCode::AuthFailed,
            SessionError::AuthTimeout => ErrorCode::AuthTimeout,
            SessionError::NotFound => ErrorCode::NotFound,
            SessionError::AuthRequired => ErrorCode::AuthRequired,
            SessionError::UnknownType(_) => ErrorCode::UnknownType,
            SessionError::NoConversation => ErrorCode::NoConversation,
            SessionError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            SessionError::AlreadyProcessing => ErrorCode::AlreadyProcessing,
            SessionError::Validation(ContentError::Empty) => ErrorCode::EmptyContent,
            SessionError::Validation(ContentError::TooLong { .. }) => ErrorCode::MessageTooLong,
            SessionError::AiTimeout => ErrorCode::AiTimeout,
            SessionError::AiService(_) => ErrorCode::AiError,
            SessionError::Storage(_) => ErrorCode::StorageError,
            SessionError::Connection(_) => ErrorCode::ConnectionError,
            SessionError::InvalidState(_) => ErrorCode::InternalError,
            SessionError::Cancelled => return None,
        };
        Some(code)
    }

    /// Human-readable text for the `chat.error` frame. Never carries
    /// provider or database details.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Protocol(_) => "Invalid message format".into(),
            SessionError::MissingToken => "Token is required".into(),
            SessionError::Auth(_) => "Invalid or expired token".into(),
            SessionError::AuthTimeout => "Authentication timeout".into(),
            SessionError::NotFound => "Conversation not found".into(),
            SessionError::AuthRequired => "Authentication required".into(),
            SessionError::UnknownType(kind) => format!("Unknown message type: {kind}"),
            SessionError::NoConversation => "No active conversation".into(),
            SessionError::RateLimited { retry_after } => {
                format!("Rate limit exceeded. Try again in {retry_after} seconds.")
            }
            SessionError::AlreadyProcessing => "Already processing a message".into(),
            SessionError::Validation(err) => err.to_string(),
            SessionError::AiTimeout => "AI response timed out".into(),
            SessionError::AiService(_) => "AI service error occurred".into(),
            SessionError::Storage(_) => "Database error occurred".into(),
            SessionError::Connection(_) => "Connection error occurred".into(),
            SessionError::InvalidState(_) => "Invalid conversation state".into(),
            SessionError::Cancelled => String::new(),
        }
    }

    /// Close code for errors that end the connection.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            SessionError::Protocol(_) => Some(CloseCode::ProtocolViolation),
            SessionError::MissingToken | SessionError::Auth(_) => Some(CloseCode::AuthFailed),
            SessionError::AuthTimeout => Some(CloseCode::AuthTimeout),
            SessionError::NotFound => Some(CloseCode::NotFound),
            _ => None,
        }
    }

    pub fn frame(&self) -> Option<ServerFrame> {
        let code = self.code()?;
        let retry_after = match self {
            SessionError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };
        Some(ServerFrame::ChatError {
            error: self.user_message(),
            code,
            retry_after,
        })
    }

    pub(crate) fn log(&self) {
        match self {
            SessionError::Storage(err) => error!(error = %err, "Storage failure during session"),
            SessionError::InvalidState(what) => {
                error!(invariant = what, "Session invariant violated, this is a bug")
            }
            SessionError::AiService(err) => warn!(error = %err, "AI service failure"),
            SessionError::AiTimeout => warn!("AI stream exceeded its deadline"),
            SessionError::Auth(err) => warn!(error = %err, "Authentication rejected"),
            SessionError::Protocol(err) => warn!(error = %err, "Closing on malformed frame"),
            SessionError::Connection(_) => debug!("Reply path closed mid-exchange"),
            other => debug!(error = %other, "Session request rejected"),
        }
    }
}
