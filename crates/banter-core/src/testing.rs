//! Test doubles for the core traits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use banter_types::chat::{
    ChatMessage, Conversation, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE,
    DEFAULT_TITLE, MessagePage, NewConversation, NewMessage,
};
use banter_types::error::{AuthError, RepositoryError};
use banter_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, PromptMessage, StreamEvent, Usage,
};
use banter_types::user::{TokenPurpose, User};

use crate::auth::CredentialValidator;
use crate::chat::repository::{ConversationStore, HistoryStream};
use crate::llm::encoding::{Encoding, TextEncoder};
use crate::llm::provider::{ChatProvider, EventStream};

/// One token per character.
pub struct CharEncoder;

impl TextEncoder for CharEncoder {
    fn encode_len(&self, _encoding: Encoding, text: &str) -> usize {
        text.chars().count()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
    messages: Mutex<Vec<ChatMessage>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_conversation(&self, owner_id: Uuid) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            user_id: owner_id,
            title: DEFAULT_TITLE.into(),
            model: DEFAULT_MODEL.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            temperature: DEFAULT_TEMPERATURE,
            is_archived: false,
            summary: String::new(),
            summary_token_count: 0,
            last_summarized_at: None,
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id, conversation.clone());
        conversation
    }

    pub fn conversation(&self, id: Uuid) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(&id).cloned()
    }

    pub fn messages(&self, conversation_id: Uuid) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection("database is locked".into()))
        } else {
            Ok(())
        }
    }
}

impl ConversationStore for InMemoryStore {
    async fn create_conversation(
        &self,
        owner_id: Uuid,
        new: &NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        self.check_writable()?;
        let mut conversation = self.seed_conversation(owner_id);
        if let Some(model) = &new.model {
            conversation.model = model.clone();
        }
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid, owner_id: Uuid) -> Result<Conversation, RepositoryError> {
        self.conversation(id)
            .filter(|c| c.user_id == owner_id)
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_conversations(
        &self,
        owner_id: Uuid,
        include_archived: bool,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == owner_id && (include_archived || !c.is_archived))
            .cloned()
            .collect())
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
    ) -> Result<ChatMessage, RepositoryError> {
        self.check_writable()?;
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
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_summary(
        &self,
        conversation_id: Uuid,
        summary: &str,
        token_count: u32,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .get_mut(&conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.summary = summary.to_string();
        conversation.summary_token_count = token_count;
        conversation.last_summarized_at = Some(Utc::now());
        Ok(())
    }

    fn history_newest_first(&self, conversation_id: Uuid) -> HistoryStream<'_> {
        let rows: Vec<Result<PromptMessage, RepositoryError>> = self
            .messages(conversation_id)
            .into_iter()
            .rev()
            .map(|m| Ok(PromptMessage::new(m.role, m.content)))
            .collect();
        Box::pin(futures_util::stream::iter(rows))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, RepositoryError> {
        let all = self.messages(conversation_id);
        let start = ((page.max(1) - 1) * page_size) as usize;
        let items: Vec<_> = all.iter().skip(start).take(page_size as usize).cloned().collect();
        Ok(MessagePage {
            has_more: all.len() > start + items.len(),
            items,
            page,
            page_size,
            total: Some(all.len() as u64),
        })
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticValidator {
    tokens: HashMap<String, (User, TokenPurpose)>,
    revoked: HashSet<String>,
}

impl StaticValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, user: User, purpose: TokenPurpose) -> Self {
        self.tokens.insert(token.to_string(), (user, purpose));
        self
    }

    pub fn with_revoked(mut self, token: &str) -> Self {
        self.revoked.insert(token.to_string());
        self
    }
}

impl CredentialValidator for StaticValidator {
    async fn resolve_user(&self, token: &str, expected: TokenPurpose) -> Result<User, AuthError> {
        let (user, purpose) = self
            .tokens
            .get(token)
            .ok_or_else(|| AuthError::Invalid("unknown token".into()))?;
        if *purpose != expected {
            return Err(AuthError::WrongPurpose {
                expected,
                actual: *purpose,
            });
        }
        if self.revoked.contains(token) {
            return Err(AuthError::Revoked);
        }
        Ok(user.clone())
    }
}

pub fn user(name: &str) -> User {
    User {
        id: Uuid::now_v7(),
        username: name.to_string(),
        is_active: true,
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum Step {
    Text(&'static str),
    Usage(u32, u32),
    Sleep(Duration),
    Fail(&'static str),
}

/// A provider that replays queued scripts.
///
/// Streams without a queued script reply "Hello world" with usage (10, 2);
/// completions without a queued result reply "summary".
#[derive(Default)]
pub struct ScriptedProvider {
    streams: Mutex<VecDeque<Vec<Step>>>,
    connect_failures: Mutex<VecDeque<LlmError>>,
    completions: Mutex<VecDeque<Result<String, LlmError>>>,
    completion_requests: Mutex<Vec<CompletionRequest>>,
    stream_requests: Mutex<Vec<CompletionRequest>>,
    connects: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stream(&self, steps: Vec<Step>) {
        self.streams.lock().unwrap().push_back(steps);
    }

    pub fn fail_connect(&self, err: LlmError) {
        self.connect_failures.lock().unwrap().push_back(err);
    }

    pub fn push_completion(&self, result: Result<String, LlmError>) {
        self.completions.lock().unwrap().push_back(result);
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn completion_calls(&self) -> usize {
        self.completion_requests.lock().unwrap().len()
    }

    pub fn last_completion_request(&self) -> Option<CompletionRequest> {
        self.completion_requests.lock().unwrap().last().cloned()
    }

    pub fn last_stream_request(&self) -> Option<CompletionRequest> {
        self.stream_requests.lock().unwrap().last().cloned()
    }
}

impl ChatProvider for Arc<ScriptedProvider> {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.completion_requests.lock().unwrap().push(request.clone());
        let content = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("summary".into()))?;
        Ok(CompletionResponse {
            id: "cmpl-test".into(),
            content,
            model: request.model.clone(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
        })
    }

    async fn connect_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.stream_requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.connect_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let steps = self.streams.lock().unwrap().pop_front().unwrap_or_else(|| {
            vec![Step::Text("Hello"), Step::Text(" world"), Step::Usage(10, 2)]
        });

        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Text(text) => yield Ok(StreamEvent::TextDelta { text: text.to_string() }),
                    Step::Usage(input, output) => yield Ok(StreamEvent::Usage(Usage {
                        input_tokens: input,
                        output_tokens: output,
                    })),
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::Fail(message) => {
                        yield Err(LlmError::Stream(message.to_string()));
                        return;
                    }
                }
            }
        }))
    }
}
