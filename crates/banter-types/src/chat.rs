//! Conversation and message types.
//!
//! A `Conversation` is owned by one user and holds the model settings used
//! for every exchange. `ChatMessage` rows are strictly ordered by creation
//! time within a conversation; that order drives history reconstruction
//! and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{MessageRole, Usage};

/// Maximum length of a user message, counted in characters.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TITLE: &str = "New conversation";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub model: String,
    pub system_prompt: String,
    /// Sampling temperature in `[0, 2]`.
    pub temperature: f64,
    pub is_archived: bool,
    /// Rolling summary of older turns; empty until the first summarization.
    pub summary: String,
    pub summary_token_count: u32,
    pub last_summarized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a conversation. Missing fields use defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewConversation {
    pub title: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
}

/// A persisted message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Only assistant messages carry token counts.
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub model_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub model_used: Option<String>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            prompt_tokens: None,
            completion_tokens: None,
            model_used: None,
        }
    }

    /// An assistant reply tagged with the model that produced it and, when
    /// the provider reported it, the token usage of the call.
    pub fn assistant(content: impl Into<String>, model: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            prompt_tokens: usage.map(|u| u.input_tokens),
            completion_tokens: usage.map(|u| u.output_tokens),
            model_used: Some(model.into()),
        }
    }
}

/// The per-connection view of a conversation, loaded once at auth time.
///
/// The summary fields are refreshed in place after a background
/// summarization completes so later turns see the new summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub summary: Option<String>,
    pub summary_token_count: u32,
}

impl From<&Conversation> for ConversationSnapshot {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id,
            user_id: c.user_id,
            model: c.model.clone(),
            system_prompt: c.system_prompt.clone(),
            temperature: c.temperature,
            summary: (!c.summary.is_empty()).then(|| c.summary.clone()),
            summary_token_count: c.summary_token_count,
        }
    }
}

/// One page of messages in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub items: Vec<ChatMessage>,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
    /// Only computed when it cannot be derived from the page itself.
    pub total: Option<u64>,
}
