//! Bounded history reconstruction and prompt assembly.
//!
//! The prompt is `[system prompt] [summary] history...`. The first two are
//! reserved; history fills the rest of the model's ceiling, newest first,
//! stopping at the first message that would overflow. The kept suffix is
//! returned in chronological order.

use futures_util::StreamExt;
use tracing::debug;
use uuid::Uuid;

use banter_types::chat::ConversationSnapshot;
use banter_types::error::RepositoryError;
use banter_types::llm::PromptMessage;

use crate::llm::token_budget::TokenBudgeter;

use super::repository::ConversationStore;

/// The longest chronological suffix of history that fits the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedHistory {
    pub messages: Vec<PromptMessage>,
    /// Reserved cost plus the cost of every kept message.
    pub total_tokens: usize,
}

/// The system-role entry carrying a conversation summary.
pub fn summary_entry(summary: &str) -> PromptMessage {
    PromptMessage::system(format!("Conversation summary: {summary}"))
}

/// Entries that precede history in every prompt.
pub fn reserved_entries(snapshot: &ConversationSnapshot) -> Vec<PromptMessage> {
    let mut entries = Vec::with_capacity(2);
    if !snapshot.system_prompt.is_empty() {
        entries.push(PromptMessage::system(snapshot.system_prompt.clone()));
    }
    if let Some(summary) = snapshot.summary.as_deref().filter(|s| !s.is_empty()) {
        entries.push(summary_entry(summary));
    }
    entries
}

/// Walk persisted history newest-first and keep what fits under the
/// model's ceiling.
///
/// Each message is charged as a one-message prompt (its own cost plus the
/// closing overhead) so the total never understates what is sent.
pub async fn bounded_history<S: ConversationStore>(
    store: &S,
    budgeter: &TokenBudgeter,
    snapshot: &ConversationSnapshot,
    conversation_id: Uuid,
) -> Result<BoundedHistory, RepositoryError> {
    let model = snapshot.model.as_str();
    let ceiling = budgeter.ceiling(model);

    let reserved = reserved_entries(snapshot);
    let reserved_tokens = if reserved.is_empty() {
        0
    } else {
        budgeter.count_tokens(&reserved, model)
    };
    let available = ceiling.saturating_sub(reserved_tokens);

    let mut selected = Vec::new();
    let mut used = 0usize;
    let mut rows = store.history_newest_first(conversation_id);

    while let Some(message) = rows.next().await {
        let message = message?;
        let cost = budgeter.count_tokens(std::slice::from_ref(&message), model);
        if used + cost > available {
            break;
        }
        used += cost;
        selected.push(message);
    }
    selected.reverse();

    debug!(
        %conversation_id,
        kept = selected.len(),
        reserved_tokens,
        history_tokens = used,
        ceiling,
        "Reconstructed bounded history"
    );

    Ok(BoundedHistory {
        messages: selected,
        total_tokens: reserved_tokens + used,
    })
}

/// Reserved entries followed by history.
pub fn build_prompt(snapshot: &ConversationSnapshot, history: &[PromptMessage]) -> Vec<PromptMessage> {
    let mut prompt = reserved_entries(snapshot);
    prompt.extend_from_slice(history);
    prompt
}
