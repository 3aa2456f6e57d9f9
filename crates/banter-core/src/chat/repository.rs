//! Conversation store trait.
//!
//! The session engine never creates conversations or messages on its own;
//! it asks the store. Implementations live in banter-infra.

use std::pin::Pin;

use futures_util::Stream;
use uuid::Uuid;

use banter_types::chat::{ChatMessage, Conversation, MessagePage, NewConversation, NewMessage};
use banter_types::error::RepositoryError;
use banter_types::llm::PromptMessage;

/// Lazily fetched `{role, content}` history, newest message first.
pub type HistoryStream<'a> =
    Pin<Box<dyn Stream<Item = Result<PromptMessage, RepositoryError>> + Send + 'a>>;

/// Repository trait for conversations and their messages.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationStore: Send + Sync {
    fn create_conversation(
        &self,
        owner_id: Uuid,
        new: &NewConversation,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    /// Load a conversation owned by `owner_id`.
    ///
    /// A conversation that exists but belongs to someone else is reported
    /// as [`RepositoryError::NotFound`], exactly like a missing one.
    fn get_conversation(
        &self,
        id: Uuid,
        owner_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    /// Conversations of `owner_id`, most recently updated first.
    fn list_conversations(
        &self,
        owner_id: Uuid,
        include_archived: bool,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Append a message and touch the conversation's `updated_at`.
    fn create_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
    ) -> impl std::future::Future<Output = Result<ChatMessage, RepositoryError>> + Send;

    /// Replace the rolling summary and stamp `last_summarized_at`.
    fn update_summary(
        &self,
        conversation_id: Uuid,
        summary: &str,
        token_count: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn history_newest_first(&self, conversation_id: Uuid) -> HistoryStream<'_>;

    /// One page (1-based) of messages in chronological order.
    fn list_messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> impl std::future::Future<Output = Result<MessagePage, RepositoryError>> + Send;
}
