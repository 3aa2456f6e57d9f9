//! SQLite conversation store.
//!
//! Implements `ConversationStore` from `banter-core` with raw queries,
//! private Row structs, and split reader/writer pool usage. Messages are
//! ordered by `(created_at, rowid)` so inserts within the same microsecond
//! keep their insertion order.

use banter_core::chat::repository::{ConversationStore, HistoryStream};
use banter_types::chat::{
    ChatMessage, Conversation, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE,
    DEFAULT_TITLE, MAX_MESSAGE_LENGTH, MessagePage, NewConversation, NewMessage,
};
use banter_types::error::RepositoryError;
use banter_types::llm::{MessageRole, PromptMessage};
use chrono::Utc;
use futures_util::StreamExt;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

pub struct SqliteConversationStore {
    pool: DatabasePool,
    max_message_length: usize,
}

impl SqliteConversationStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }

    /// Character limit for user messages; should match the session's.
    pub fn with_max_message_length(mut self, limit: usize) -> Self {
        self.max_message_length = limit;
        self
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    user_id: String,
    title: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    is_archived: bool,
    summary: String,
    summary_token_count: i64,
    last_summarized_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            model: row.try_get("model")?,
            system_prompt: row.try_get("system_prompt")?,
            temperature: row.try_get("temperature")?,
            is_archived: row.try_get("is_archived")?,
            summary: row.try_get("summary")?,
            summary_token_count: row.try_get("summary_token_count")?,
            last_summarized_at: row.try_get("last_summarized_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        Ok(Conversation {
            id: parse_uuid(&self.id, "conversation id")?,
            user_id: parse_uuid(&self.user_id, "user_id")?,
            title: self.title,
            model: self.model,
            system_prompt: self.system_prompt,
            temperature: self.temperature,
            is_archived: self.is_archived,
            summary: self.summary,
            summary_token_count: self.summary_token_count.max(0) as u32,
            last_summarized_at: self
                .last_summarized_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    model_used: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            model_used: row.try_get("model_used")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        Ok(ChatMessage {
            id: parse_uuid(&self.id, "message id")?,
            conversation_id: parse_uuid(&self.conversation_id, "conversation_id")?,
            role: parse_role(&self.role)?,
            content: self.content,
            prompt_tokens: self.prompt_tokens.map(|t| t.max(0) as u32),
            completion_tokens: self.completion_tokens.map(|t| t.max(0) as u32),
            model_used: self.model_used,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what}: {e}")))
}

fn parse_role(s: &str) -> Result<MessageRole, RepositoryError> {
    s.parse().map_err(|e: String| RepositoryError::Query(e))
}

impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(
        &self,
        owner_id: Uuid,
        new: &NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        let temperature = new.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(RepositoryError::Validation(format!(
                "temperature {temperature} outside [0, 2]"
            )));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            user_id: owner_id,
            title: new.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            model: new.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: new
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature,
            is_archived: false,
            summary: String::new(),
            summary_token_count: 0,
            last_summarized_at: None,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            "INSERT INTO conversations (id, user_id, title, model, system_prompt, temperature, is_archived, summary, summary_token_count, last_summarized_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, '', 0, NULL, ?, ?)",
        )
        .bind(conversation.id.to_string())
        .bind(owner_id.to_string())
        .bind(&conversation.title)
        .bind(&conversation.model)
        .bind(&conversation.system_prompt)
        .bind(conversation.temperature)
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(conversation),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("FOREIGN KEY") => {
                Err(RepositoryError::Validation(format!("unknown user {owner_id}")))
            }
            Err(e) => Err(query_error(e)),
        }
    }

    async fn get_conversation(&self, id: Uuid, owner_id: Uuid) -> Result<Conversation, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(owner_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?
            .ok_or(RepositoryError::NotFound)?;

        ConversationRow::from_row(&row)
            .map_err(query_error)?
            .into_conversation()
    }

    async fn list_conversations(
        &self,
        owner_id: Uuid,
        include_archived: bool,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ? AND (? OR is_archived = 0)
             ORDER BY updated_at DESC, rowid DESC",
        )
        .bind(owner_id.to_string())
        .bind(include_archived)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                ConversationRow::from_row(row)
                    .map_err(query_error)?
                    .into_conversation()
            })
            .collect()
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
    ) -> Result<ChatMessage, RepositoryError> {
        let limit = self.max_message_length;
        if message.role == MessageRole::User && message.content.chars().count() > limit {
            return Err(RepositoryError::Validation(format!(
                "message exceeds {limit} characters"
            )));
        }

        let stored = ChatMessage {
            id: Uuid::now_v7(),
            conversation_id,
            role: message.role,
            content: message.content.clone(),
            prompt_tokens: message.prompt_tokens,
            completion_tokens: message.completion_tokens,
            model_used: message.model_used.clone(),
            created_at: Utc::now(),
        };
        let created_at = format_datetime(&stored.created_at);

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&created_at)
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        if touched.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, prompt_tokens, completion_tokens, model_used, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(stored.id.to_string())
        .bind(conversation_id.to_string())
        .bind(stored.role.as_str())
        .bind(&stored.content)
        .bind(stored.prompt_tokens.map(i64::from))
        .bind(stored.completion_tokens.map(i64::from))
        .bind(&stored.model_used)
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(stored)
    }

    async fn update_summary(
        &self,
        conversation_id: Uuid,
        summary: &str,
        token_count: u32,
    ) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        let result = sqlx::query(
            "UPDATE conversations SET summary = ?, summary_token_count = ?, last_summarized_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(summary)
        .bind(i64::from(token_count))
        .bind(&now)
        .bind(&now)
        .bind(conversation_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn history_newest_first(&self, conversation_id: Uuid) -> HistoryStream<'_> {
        let rows = sqlx::query(
            "SELECT role, content FROM messages WHERE conversation_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(conversation_id.to_string())
        .fetch(&self.pool.reader);

        Box::pin(rows.map(|row| {
            let row = row.map_err(query_error)?;
            let role: String = row.try_get("role").map_err(query_error)?;
            let content: String = row.try_get("content").map_err(query_error)?;
            Ok(PromptMessage::new(parse_role(&role)?, content))
        }))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, RepositoryError> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        // One extra row tells us whether a next page exists.
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
        )
        .bind(conversation_id.to_string())
        .bind(i64::from(page_size) + 1)
        .bind(offset)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut items = rows
            .iter()
            .map(|row| MessageRow::from_row(row).map_err(query_error)?.into_message())
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = items.len() > page_size as usize;
        items.truncate(page_size as usize);

        let total = if has_more || page > 1 {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
                .bind(conversation_id.to_string())
                .fetch_one(&self.pool.reader)
                .await
                .map_err(query_error)?;
            Some(count.max(0) as u64)
        } else {
            None
        };

        Ok(MessagePage {
            items,
            page,
            page_size,
            has_more,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::credential::SqliteCredentialStore;
    use crate::sqlite::pool::test_support::test_pool;
    use futures_util::TryStreamExt;

    async fn setup() -> (SqliteConversationStore, Uuid) {
        let pool = test_pool().await;
        let user = SqliteCredentialStore::new(pool.clone())
            .create_user("alice")
            .await
            .unwrap();
        (SqliteConversationStore::new(pool), user.id)
    }

    #[tokio::test]
    async fn test_create_with_defaults_and_get() {
        let (store, owner) = setup().await;
        let created = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();
        assert_eq!(created.title, "New conversation");
        assert_eq!(created.model, "gpt-4o");
        assert_eq!(created.system_prompt, "You are a helpful assistant.");
        assert_eq!(created.temperature, 0.7);

        let loaded = store.get_conversation(created.id, owner).await.unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.summary, "");
        assert!(loaded.last_summarized_at.is_none());
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_temperature() {
        let (store, owner) = setup().await;
        let err = store
            .create_conversation(
                owner,
                &NewConversation {
                    temperature: Some(2.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_foreign_and_missing_conversations_are_indistinguishable() {
        let (store, owner) = setup().await;
        let created = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();

        let stranger = Uuid::now_v7();
        assert!(matches!(
            store.get_conversation(created.id, stranger).await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            store.get_conversation(Uuid::now_v7(), owner).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_messages_round_trip_in_order() {
        let (store, owner) = setup().await;
        let conversation = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();

        store
            .create_message(conversation.id, &NewMessage::user("first"))
            .await
            .unwrap();
        let reply = store
            .create_message(
                conversation.id,
                &NewMessage::assistant(
                    "second",
                    "gpt-4o",
                    Some(banter_types::llm::Usage {
                        input_tokens: 12,
                        output_tokens: 3,
                    }),
                ),
            )
            .await
            .unwrap();
        store
            .create_message(conversation.id, &NewMessage::user("third"))
            .await
            .unwrap();

        let history: Vec<PromptMessage> = store
            .history_newest_first(conversation.id)
            .try_collect()
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["third", "second", "first"]);
        assert_eq!(history[1].role, MessageRole::Assistant);

        let page = store.list_messages(conversation.id, 1, 10).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(!page.has_more);
        assert!(page.total.is_none());
        assert_eq!(page.items[1].id, reply.id);
        assert_eq!(page.items[1].prompt_tokens, Some(12));
        assert_eq!(page.items[1].completion_tokens, Some(3));
        assert_eq!(page.items[1].model_used.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_pagination_reports_more_and_total() {
        let (store, owner) = setup().await;
        let conversation = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();
        for i in 0..5 {
            store
                .create_message(conversation.id, &NewMessage::user(format!("m{i}")))
                .await
                .unwrap();
        }

        let first = store.list_messages(conversation.id, 1, 2).await.unwrap();
        assert!(first.has_more);
        assert_eq!(first.total, Some(5));
        let contents: Vec<_> = first.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1"]);

        let last = store.list_messages(conversation.id, 3, 2).await.unwrap();
        assert!(!last.has_more);
        assert_eq!(last.total, Some(5));
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].content, "m4");
    }

    #[tokio::test]
    async fn test_message_touches_updated_at_and_list_order() {
        let (store, owner) = setup().await;
        let older = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();
        let newer = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();

        store
            .create_message(older.id, &NewMessage::user("bump"))
            .await
            .unwrap();

        let listed = store.list_conversations(owner, false).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn test_message_for_missing_conversation_is_not_found() {
        let (store, _) = setup().await;
        let err = store
            .create_message(Uuid::now_v7(), &NewMessage::user("orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_oversized_user_message_is_rejected() {
        let (store, owner) = setup().await;
        let conversation = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();
        let err = store
            .create_message(
                conversation.id,
                &NewMessage::user("x".repeat(MAX_MESSAGE_LENGTH + 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_raised_length_limit_is_honored() {
        let (store, owner) = setup().await;
        let store = store.with_max_message_length(MAX_MESSAGE_LENGTH * 2);
        let conversation = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();

        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        let stored = store
            .create_message(conversation.id, &NewMessage::user(long.clone()))
            .await
            .unwrap();
        assert_eq!(stored.content, long);

        let err = store
            .create_message(
                conversation.id,
                &NewMessage::user("x".repeat(MAX_MESSAGE_LENGTH * 2 + 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_summary_stamps_time() {
        let (store, owner) = setup().await;
        let conversation = store
            .create_conversation(owner, &NewConversation::default())
            .await
            .unwrap();

        store
            .update_summary(conversation.id, "they talked about traits", 23_000)
            .await
            .unwrap();

        let loaded = store.get_conversation(conversation.id, owner).await.unwrap();
        assert_eq!(loaded.summary, "they talked about traits");
        assert_eq!(loaded.summary_token_count, 23_000);
        assert!(loaded.last_summarized_at.is_some());

        assert!(matches!(
            store.update_summary(Uuid::now_v7(), "x", 1).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
