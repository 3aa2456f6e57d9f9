//! Conversation summarizer.
//!
//! `Summarizer` condenses the history that was just sent to the model (plus
//! the new assistant turn) into a short rolling summary and stores it on the
//! conversation. It runs in the background and is best-effort.

use std::sync::Arc;

use uuid::Uuid;

use banter_types::error::RepositoryError;
use banter_types::llm::{AiServiceError, PromptMessage};

use crate::llm::client::AiClient;

use super::repository::ConversationStore;

const SUMMARY_PROMPT: &str = "Summarize the conversation below in at most 200 words.
- Keep key facts and the user's stated preferences
- Keep context needed to continue the conversation

Conversation:
{conversation_history}

Reply with the summary only, no preamble.";

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error(transparent)]
    Ai(#[from] AiServiceError),

    #[error("failed to store summary: {0}")]
    Storage(#[from] RepositoryError),

    #[error("model returned an empty summary")]
    Empty,
}

/// The single user-role message asking for a summary of `messages`.
pub fn build_summary_prompt(messages: &[PromptMessage]) -> Vec<PromptMessage> {
    let history = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    vec![PromptMessage::user(
        SUMMARY_PROMPT.replace("{conversation_history}", &history),
    )]
}

pub struct Summarizer<S> {
    ai: Arc<AiClient>,
    store: Arc<S>,
    temperature: f64,
    max_tokens: u32,
}

impl<S> Clone for Summarizer<S> {
    fn clone(&self) -> Self {
        Self {
            ai: Arc::clone(&self.ai),
            store: Arc::clone(&self.store),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl<S: ConversationStore> Summarizer<S> {
    pub fn new(ai: Arc<AiClient>, store: Arc<S>, temperature: f64, max_tokens: u32) -> Self {
        Self {
            ai,
            store,
            temperature,
            max_tokens,
        }
    }

    /// Ask the model for a summary of `messages`.
    #[tracing::instrument(
        name = "summarize_conversation",
        skip(self, messages),
        fields(model = %model, message_count = messages.len())
    )]
    pub async fn generate(&self, messages: &[PromptMessage], model: &str) -> Result<String, SummaryError> {
        let response = self
            .ai
            .complete(
                build_summary_prompt(messages),
                model,
                self.temperature,
                self.max_tokens,
            )
            .await?;

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(SummaryError::Empty);
        }
        Ok(summary.to_string())
    }

    /// Persist a generated summary along with the token count it covers.
    pub async fn store(
        &self,
        conversation_id: Uuid,
        summary: &str,
        token_count: u32,
    ) -> Result<(), SummaryError> {
        self.store
            .update_summary(conversation_id, summary, token_count)
            .await?;
        Ok(())
    }
}
