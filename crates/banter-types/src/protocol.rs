//! WebSocket wire protocol.
//!
//! Every frame is a single UTF-8 JSON object whose `type` field selects the
//! variant. Application close codes live in the 4000-4999 range.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "auth")]
    /// A `null` or absent token is treated as missing.
    Auth {
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "chat.message")]
    ChatMessage {
        #[serde(default)]
        content: String,
    },

    /// Any `type` this server does not understand (or none at all).
    #[serde(skip_deserializing)]
    Unknown { kind: String },
}

/// A frame that could not be decoded at all.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("frame must be a JSON object")]
    NotAnObject,

    #[error("malformed '{kind}' frame: {reason}")]
    Shape { kind: String, reason: String },
}

impl ClientFrame {
    /// Decode one text frame.
    ///
    /// Unrecognized `type` values decode to [`ClientFrame::Unknown`] so the
    /// caller can answer them without closing; undecodable payloads are
    /// protocol violations.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(FrameError::NotAnObject);
        };

        let kind = object
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "auth" | "pong" | "chat.message" => {
                serde_json::from_value(value).map_err(|e| FrameError::Shape {
                    kind,
                    reason: e.to_string(),
                })
            }
            _ => Ok(ClientFrame::Unknown { kind }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ClientFrame::Auth { .. } => "auth",
            ClientFrame::Pong => "pong",
            ClientFrame::ChatMessage { .. } => "chat.message",
            ClientFrame::Unknown { kind } => kind,
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "auth.success")]
    AuthSuccess { conversation_id: Uuid },

    #[serde(rename = "chat.stream")]
    ChatStream {
        content: String,
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
    },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "chat.error")]
    ChatError {
        error: String,
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
}

impl ServerFrame {
    /// A non-terminal stream frame carrying one content delta.
    pub fn delta(content: impl Into<String>) -> Self {
        ServerFrame::ChatStream {
            content: content.into(),
            done: false,
            message_id: None,
        }
    }

    /// The terminal stream frame of an exchange.
    pub fn done(message_id: Uuid) -> Self {
        ServerFrame::ChatStream {
            content: String::new(),
            done: true,
            message_id: Some(message_id),
        }
    }

    pub fn error(code: ErrorCode, error: impl Into<String>) -> Self {
        ServerFrame::ChatError {
            error: error.into(),
            code,
            retry_after: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Stable machine-readable error codes carried by `chat.error` frames.
///
/// Each code names exactly one condition; codes are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidJson,
    UnknownType,
    AuthRequired,
    AuthFailed,
    AuthTimeout,
    NoConversation,
    NotFound,
    RateLimitExceeded,
    AlreadyProcessing,
    EmptyContent,
    MessageTooLong,
    AiTimeout,
    AiError,
    StorageError,
    ConnectionError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::UnknownType => "UNKNOWN_TYPE",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::AuthTimeout => "AUTH_TIMEOUT",
            ErrorCode::NoConversation => "NO_CONVERSATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::AlreadyProcessing => "ALREADY_PROCESSING",
            ErrorCode::EmptyContent => "EMPTY_CONTENT",
            ErrorCode::MessageTooLong => "MESSAGE_TOO_LONG",
            ErrorCode::AiTimeout => "AI_TIMEOUT",
            ErrorCode::AiError => "AI_ERROR",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    AuthFailed,
    MalformedIdentifier,
    AuthTimeout,
    NotFound,
    ProtocolViolation,
    /// A server-side failure prevented the session from starting.
    InternalError,
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::AuthFailed => 4001,
            CloseCode::MalformedIdentifier => 4002,
            CloseCode::AuthTimeout => 4003,
            CloseCode::NotFound => 4004,
            CloseCode::ProtocolViolation => 4005,
            CloseCode::InternalError => 1011,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseCode::AuthFailed => "authentication failed",
            CloseCode::MalformedIdentifier => "malformed conversation id",
            CloseCode::AuthTimeout => "authentication timeout",
            CloseCode::NotFound => "conversation not found",
            CloseCode::ProtocolViolation => "protocol violation",
            CloseCode::InternalError => "internal error",
        }
    }
}
