use std::sync::Arc;
use std::time::Duration;

use futures_util::stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use banter_types::chat::{Conversation, MAX_MESSAGE_LENGTH};
use banter_types::llm::{LlmError, MessageRole};
use banter_types::protocol::{CloseCode, ErrorCode, ServerFrame};
use banter_types::user::TokenPurpose;

use super::*;
use crate::llm::box_provider::BoxChatProvider;
use crate::llm::retry::RetryPolicy;
use crate::testing::{CharEncoder, InMemoryStore, ScriptedProvider, StaticValidator, Step, user};

const ACCESS: &str = "access-token";
const REFRESH: &str = "refresh-token";
const REVOKED: &str = "revoked-token";
const STRANGER: &str = "stranger-token";

fn settings() -> SessionSettings {
    SessionSettings {
        // Keep pings out of the way unless a test asks for them.
        heartbeat_interval: Duration::from_secs(3600),
        ..SessionSettings::default()
    }
}

struct Harness {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::Receiver<Outbound>,
    store: Arc<InMemoryStore>,
    provider: Arc<ScriptedProvider>,
    conversation: Conversation,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(settings: SessionSettings) -> Self {
        Self::start_with(settings, None)
    }

    fn start_with(settings: SessionSettings, raw_id: Option<&str>) -> Self {
        let owner = user("alice");
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.seed_conversation(owner.id);
        let provider = Arc::new(ScriptedProvider::new());

        let validator = StaticValidator::new()
            .with_token(ACCESS, owner.clone(), TokenPurpose::Access)
            .with_token(REFRESH, owner.clone(), TokenPurpose::Refresh)
            .with_token(REVOKED, owner, TokenPurpose::Access)
            .with_revoked(REVOKED)
            .with_token(STRANGER, user("mallory"), TokenPurpose::Access);

        let services = SessionServices::new(
            Arc::clone(&store),
            Arc::new(validator),
            Arc::new(RateLimiter::in_process()),
            Arc::new(AiClient::new(
                BoxChatProvider::new(Arc::clone(&provider)),
                RetryPolicy::default(),
            )),
            Arc::new(TokenBudgeter::new(Arc::new(CharEncoder))),
            settings,
        );

        let (outbox, outbound) = Outbox::channel(64);
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let inbound = Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|text| (text, rx))
        }));

        let shutdown = CancellationToken::new();
        let engine = SessionEngine::new(services, outbox, &shutdown);
        let raw = raw_id.map_or_else(|| conversation.id.to_string(), str::to_string);
        let handle = tokio::spawn(async move { engine.run(&raw, inbound).await });

        Self {
            inbound: Some(tx),
            outbound,
            store,
            provider,
            conversation,
            shutdown,
            handle,
        }
    }

    fn send(&self, frame: serde_json::Value) {
        self.send_raw(&frame.to_string());
    }

    fn send_raw(&self, text: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(text.to_string());
        }
    }

    fn chat(&self, content: &str) {
        self.send(json!({"type": "chat.message", "content": content}));
    }

    async fn next(&mut self) -> Outbound {
        tokio::time::timeout(Duration::from_secs(600), self.outbound.recv())
            .await
            .expect("no outbound message")
            .expect("outbound channel closed")
    }

    async fn frame(&mut self) -> ServerFrame {
        match self.next().await {
            Outbound::Frame(frame) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    async fn error_code(&mut self) -> ErrorCode {
        match self.frame().await {
            ServerFrame::ChatError { code, .. } => code,
            other => panic!("expected chat.error, got {other:?}"),
        }
    }

    async fn closed_with(&mut self) -> CloseCode {
        match self.next().await {
            Outbound::Close(code) => code,
            other => panic!("expected close, got {other:?}"),
        }
    }

    async fn authenticate(&mut self) {
        self.send(json!({"type": "auth", "token": ACCESS}));
        assert_eq!(
            self.frame().await,
            ServerFrame::AuthSuccess {
                conversation_id: self.conversation.id
            }
        );
    }

    /// Collect deltas until the terminal frame; returns the text and the
    /// persisted message id.
    async fn reply(&mut self) -> (String, uuid::Uuid) {
        let mut text = String::new();
        loop {
            match self.frame().await {
                ServerFrame::ChatStream {
                    content,
                    done: false,
                    ..
                } => text.push_str(&content),
                ServerFrame::ChatStream {
                    done: true,
                    message_id: Some(id),
                    content,
                } => {
                    assert!(content.is_empty());
                    return (text, id);
                }
                other => panic!("expected chat.stream, got {other:?}"),
            }
        }
    }

    fn messages(&self) -> Vec<(MessageRole, String)> {
        self.store
            .messages(self.conversation.id)
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    async fn disconnect(mut self) {
        self.inbound.take();
        self.handle.await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_conversation_id_is_rejected() {
    let mut h = Harness::start_with(settings(), Some("not-a-uuid"));
    assert_eq!(h.closed_with().await, CloseCode::MalformedIdentifier);
    h.disconnect().await;
}

#[tokio::test]
async fn test_valid_token_authenticates_and_repeat_auth_is_a_noop() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.send(json!({"type": "auth", "token": ACCESS}));
    h.chat("hi");
    // The first frame after the repeated auth belongs to the chat reply.
    let (text, _) = h.reply().await;
    assert_eq!(text, "Hello world");
    h.disconnect().await;
}

#[tokio::test]
async fn test_refresh_token_is_rejected() {
    let mut h = Harness::start(settings());
    h.send(json!({"type": "auth", "token": REFRESH}));
    assert_eq!(h.error_code().await, ErrorCode::AuthFailed);
    assert_eq!(h.closed_with().await, CloseCode::AuthFailed);
    h.disconnect().await;
}

#[tokio::test]
async fn test_revoked_token_is_rejected() {
    let mut h = Harness::start(settings());
    h.send(json!({"type": "auth", "token": REVOKED}));
    assert_eq!(h.error_code().await, ErrorCode::AuthFailed);
    assert_eq!(h.closed_with().await, CloseCode::AuthFailed);
    h.disconnect().await;
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let mut h = Harness::start(settings());
    h.send(json!({"type": "auth"}));
    match h.frame().await {
        ServerFrame::ChatError { error, code, .. } => {
            assert_eq!(code, ErrorCode::AuthFailed);
            assert_eq!(error, "Token is required");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.closed_with().await, CloseCode::AuthFailed);
    h.disconnect().await;
}

#[tokio::test]
async fn test_null_token_counts_as_missing() {
    let mut h = Harness::start(settings());
    h.send(json!({"type": "auth", "token": null}));
    assert_eq!(h.error_code().await, ErrorCode::AuthFailed);
    assert_eq!(h.closed_with().await, CloseCode::AuthFailed);
    h.disconnect().await;
}

#[tokio::test]
async fn test_foreign_conversation_looks_missing() {
    let mut h = Harness::start(settings());
    h.send(json!({"type": "auth", "token": STRANGER}));
    assert_eq!(h.error_code().await, ErrorCode::NotFound);
    assert_eq!(h.closed_with().await, CloseCode::NotFound);
    h.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_deadline_closes_with_timeout_code() {
    let mut h = Harness::start(settings());
    h.chat("sneaky");
    assert_eq!(h.error_code().await, ErrorCode::AuthRequired);

    assert_eq!(h.error_code().await, ErrorCode::AuthTimeout);
    assert_eq!(h.closed_with().await, CloseCode::AuthTimeout);

    h.handle.await.unwrap();
    assert!(h.store.messages(h.conversation.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_auth_before_deadline_disarms_it() {
    let mut h = Harness::start(settings());
    tokio::time::sleep(Duration::from_secs(29)).await;
    h.authenticate().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(h.outbound.try_recv().is_err());
    h.chat("still here");
    h.reply().await;
    h.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frame_is_fatal() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.send_raw("{not json");
    assert_eq!(h.error_code().await, ErrorCode::InvalidJson);
    assert_eq!(h.closed_with().await, CloseCode::ProtocolViolation);
    h.disconnect().await;
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_type_keeps_connection_open() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.send(json!({"type": "typing"}));
    match h.frame().await {
        ServerFrame::ChatError { error, code, .. } => {
            assert_eq!(code, ErrorCode::UnknownType);
            assert_eq!(error, "Unknown message type: typing");
        }
        other => panic!("unexpected {other:?}"),
    }

    h.send(json!({"type": "pong"}));
    h.chat("hi");
    h.reply().await;
    h.disconnect().await;
}

#[tokio::test]
async fn test_frame_without_type_is_answered_as_unknown() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.send(json!({"content": "no type"}));
    assert_eq!(h.error_code().await, ErrorCode::UnknownType);

    h.chat("still here");
    h.reply().await;
    h.disconnect().await;
}

#[tokio::test]
async fn test_exchange_streams_and_persists() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider
        .push_stream(vec![Step::Text("Own"), Step::Text("ership"), Step::Usage(42, 7)]);

    h.chat("  what is ownership?  ");
    let (text, message_id) = h.reply().await;
    assert_eq!(text, "Ownership");

    let stored = h.store.messages(h.conversation.id);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, MessageRole::User);
    assert_eq!(stored[0].content, "what is ownership?");
    assert_eq!(stored[0].completion_tokens, None);
    assert_eq!(stored[1].id, message_id);
    assert_eq!(stored[1].content, "Ownership");
    assert_eq!(stored[1].prompt_tokens, Some(42));
    assert_eq!(stored[1].completion_tokens, Some(7));
    assert_eq!(stored[1].model_used.as_deref(), Some("gpt-4o"));

    let request = h.provider.last_stream_request().unwrap();
    assert_eq!(request.messages[0].role, MessageRole::System);
    assert_eq!(request.messages.last().unwrap().content, "what is ownership?");
    h.disconnect().await;
}

#[tokio::test]
async fn test_next_prompt_includes_previous_turns_in_order() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.chat("first");
    h.reply().await;
    h.chat("second");
    h.reply().await;

    let request = h.provider.last_stream_request().unwrap();
    let contents: Vec<_> = request.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["You are a helpful assistant.", "first", "Hello world", "second"]
    );
    h.disconnect().await;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_blank_content_is_rejected_without_persisting() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.chat("   \n\t ");
    assert_eq!(h.error_code().await, ErrorCode::EmptyContent);
    assert!(h.messages().is_empty());

    // The gate was released.
    h.chat("hello");
    h.reply().await;
    h.disconnect().await;
}

#[tokio::test]
async fn test_length_limit_is_inclusive() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.chat(&"a".repeat(MAX_MESSAGE_LENGTH + 1));
    assert_eq!(h.error_code().await, ErrorCode::MessageTooLong);
    assert!(h.messages().is_empty());

    h.chat(&"a".repeat(MAX_MESSAGE_LENGTH));
    h.reply().await;
    assert_eq!(h.messages()[0].1.len(), MAX_MESSAGE_LENGTH);
    h.disconnect().await;
}

#[tokio::test]
async fn test_markup_is_stripped_before_persisting() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.chat("Hello <script>alert('x')</script>world");
    h.reply().await;
    assert_eq!(h.messages()[0], (MessageRole::User, "Hello world".to_string()));
    h.disconnect().await;
}

#[tokio::test]
async fn test_plain_text_symbols_survive_sanitizing() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.chat("Tom & Jerry <b>x</b>");
    h.reply().await;
    assert_eq!(h.messages()[0], (MessageRole::User, "Tom & Jerry x".to_string()));
    h.disconnect().await;
}

// ---------------------------------------------------------------------------
// Admission and exclusion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fourth_message_in_window_is_rate_limited() {
    let mut h = Harness::start(SessionSettings {
        rate_limit_max: 3,
        rate_limit_window: Duration::from_secs(60),
        ..settings()
    });
    h.authenticate().await;

    for i in 0..3 {
        h.chat(&format!("message {i}"));
        h.reply().await;
    }

    h.chat("one too many");
    match h.frame().await {
        ServerFrame::ChatError {
            code, retry_after, ..
        } => {
            assert_eq!(code, ErrorCode::RateLimitExceeded);
            assert!(retry_after.is_some_and(|secs| secs > 0));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.messages().len(), 6);
    h.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_message_while_processing_is_refused() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider.push_stream(vec![
        Step::Text("slow"),
        Step::Sleep(Duration::from_secs(10)),
        Step::Text(" reply"),
        Step::Usage(5, 2),
    ]);

    h.chat("first");
    assert_eq!(h.frame().await, ServerFrame::delta("slow"));

    h.chat("second");
    assert_eq!(h.error_code().await, ErrorCode::AlreadyProcessing);

    let (rest, _) = h.reply().await;
    assert_eq!(rest, " reply");
    assert_eq!(
        h.messages(),
        vec![
            (MessageRole::User, "first".to_string()),
            (MessageRole::Assistant, "slow reply".to_string()),
        ]
    );
    h.disconnect().await;
}

// ---------------------------------------------------------------------------
// Failures inside the exchange
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_slow_stream_times_out_without_saving_a_reply() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider.push_stream(vec![
        Step::Text("partial"),
        Step::Sleep(Duration::from_secs(200)),
        Step::Text(" never"),
    ]);

    h.chat("tell me a story");
    assert_eq!(h.frame().await, ServerFrame::delta("partial"));
    match h.frame().await {
        ServerFrame::ChatError { code, error, .. } => {
            assert_eq!(code, ErrorCode::AiTimeout);
            assert_eq!(error, "AI response timed out");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.messages(), vec![(MessageRole::User, "tell me a story".to_string())]);

    h.chat("again");
    h.reply().await;
    h.disconnect().await;
}

#[tokio::test]
async fn test_ai_failure_is_reported_and_session_survives() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider.fail_connect(LlmError::AuthenticationFailed);

    h.chat("hi");
    assert_eq!(h.error_code().await, ErrorCode::AiError);

    h.chat("hi again");
    h.reply().await;
    h.disconnect().await;
}

#[tokio::test]
async fn test_mid_stream_failure_is_reported() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider
        .push_stream(vec![Step::Text("half"), Step::Fail("connection reset")]);

    h.chat("hi");
    assert_eq!(h.frame().await, ServerFrame::delta("half"));
    assert_eq!(h.error_code().await, ErrorCode::AiError);
    assert_eq!(h.messages().len(), 1);
    h.disconnect().await;
}

#[tokio::test]
async fn test_storage_failure_is_reported_and_session_survives() {
    let mut h = Harness::start(settings());
    h.authenticate().await;

    h.store.fail_writes(true);
    h.chat("hi");
    match h.frame().await {
        ServerFrame::ChatError { code, error, .. } => {
            assert_eq!(code, ErrorCode::StorageError);
            assert_eq!(error, "Database error occurred");
        }
        other => panic!("unexpected {other:?}"),
    }

    h.store.fail_writes(false);
    h.chat("hi");
    h.reply().await;
    h.disconnect().await;
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_crossing_threshold_summarizes_and_refreshes_snapshot() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider.push_completion(Ok("They discussed borrowing.".into()));
    // gpt-4o: ceiling 32_000, threshold 22_400.
    h.provider
        .push_stream(vec![Step::Text("long answer"), Step::Usage(100, 30_000)]);

    h.chat("explain borrowing");
    h.reply().await;

    let mut summarized = None;
    for _ in 0..200 {
        let current = h.store.conversation(h.conversation.id).unwrap();
        if !current.summary.is_empty() {
            summarized = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let summarized = summarized.expect("summary was never stored");
    assert_eq!(summarized.summary, "They discussed borrowing.");
    assert!(summarized.summary_token_count > 22_400);

    let request = h.provider.last_completion_request().unwrap();
    assert_eq!(request.temperature, Some(0.3));
    assert_eq!(request.max_tokens, Some(500));
    assert!(request.messages[0].content.contains("assistant: long answer"));

    // Give the task a moment to update the in-memory snapshot after the
    // store write.
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.chat("and lifetimes?");
    h.reply().await;
    let prompt = h.provider.last_stream_request().unwrap();
    assert_eq!(
        prompt.messages[1].content,
        "Conversation summary: They discussed borrowing."
    );
    assert_eq!(h.provider.completion_calls(), 1);
    h.disconnect().await;
}

#[tokio::test]
async fn test_below_threshold_does_not_summarize() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.chat("short");
    h.reply().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.provider.completion_calls(), 0);
    h.disconnect().await;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_heartbeat_starts_after_auth() {
    let mut h = Harness::start(SessionSettings {
        heartbeat_interval: Duration::from_secs(30),
        ..SessionSettings::default()
    });
    h.authenticate().await;
    assert_eq!(h.frame().await, ServerFrame::Ping);
    h.send(json!({"type": "pong"}));
    assert_eq!(h.frame().await, ServerFrame::Ping);
    h.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_abandons_in_flight_exchange() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.provider.push_stream(vec![
        Step::Text("thinking"),
        Step::Sleep(Duration::from_secs(60)),
        Step::Text(" done"),
    ]);
    h.chat("hi");
    assert_eq!(h.frame().await, ServerFrame::delta("thinking"));

    let store = Arc::clone(&h.store);
    let id = h.conversation.id;
    h.disconnect().await;
    assert_eq!(store.messages(id).len(), 1);
}

#[tokio::test]
async fn test_server_shutdown_ends_session() {
    let mut h = Harness::start(settings());
    h.authenticate().await;
    h.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), &mut h.handle)
        .await
        .expect("session did not stop")
        .unwrap();
}

#[test]
fn test_settings_follow_config() {
    let s = SessionSettings::default();
    assert_eq!(s.auth_timeout, Duration::from_secs(30));
    assert_eq!(s.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(s.ai_stream_timeout, Duration::from_secs(120));
    assert_eq!(s.task_cancel_grace, Duration::from_secs(5));
    assert_eq!(s.rate_limit_max, 20);
    assert_eq!(s.rate_limit_window, Duration::from_secs(60));
    assert_eq!(s.summary_max_tokens, 500);
}
