//! One chat exchange: user turn in, streamed assistant turn out.
//!
//! An [`Exchange`] runs on its own task while holding the connection's
//! processing gate, so the read loop stays responsive and can refuse a
//! second message with `ALREADY_PROCESSING`. Every failure is reported as
//! exactly one error frame and the gate is released when the task ends.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, warn};
use uuid::Uuid;

use banter_types::chat::{ConversationSnapshot, NewMessage};
use banter_types::llm::{PromptMessage, StreamEvent, Usage};
use banter_types::protocol::ServerFrame;

use crate::chat::content::validate_content;
use crate::chat::history::{bounded_history, build_prompt};
use crate::chat::repository::ConversationStore;
use crate::chat::summarizer::Summarizer;
use crate::llm::client::AiClient;
use crate::llm::token_budget::TokenBudgeter;

use super::error::SessionError;
use super::tasks::BackgroundTask;
use super::{Outbox, SessionSettings};

/// The conversation view shared between the read loop, exchanges and the
/// summary task.
pub(crate) type SharedSnapshot = Arc<Mutex<ConversationSnapshot>>;

/// Holder of the at-most-one in-flight summary task.
pub(crate) type SummarySlot = Arc<Mutex<Option<BackgroundTask>>>;

pub(crate) fn read_snapshot(snapshot: &SharedSnapshot) -> ConversationSnapshot {
    snapshot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Text and usage of a completed stream.
struct Reply {
    text: String,
    usage: Option<Usage>,
}

pub(crate) struct Exchange<S> {
    pub(crate) conversation_id: Uuid,
    pub(crate) store: Arc<S>,
    pub(crate) ai: Arc<AiClient>,
    pub(crate) budgeter: Arc<TokenBudgeter>,
    pub(crate) settings: SessionSettings,
    pub(crate) outbox: Outbox,
    pub(crate) snapshot: SharedSnapshot,
    pub(crate) summaries: SummaryScheduler<S>,
}

impl<S: ConversationStore + 'static> Exchange<S> {
    /// Process `content` and report any failure. The gate is held until
    /// this returns.
    pub(crate) async fn run(self, content: String, gate: OwnedMutexGuard<()>, token: CancellationToken) {
        let _gate = gate;
        match self.process(&content, &token).await {
            Ok(()) => {}
            Err(SessionError::Cancelled) => debug!("Exchange cancelled"),
            Err(err) => {
                err.log();
                if let Some(frame) = err.frame() {
                    if self.outbox.send(frame).await.is_err() {
                        debug!("Could not report exchange failure, transport closed");
                    }
                }
            }
        }
    }

    async fn process(&self, raw: &str, token: &CancellationToken) -> Result<(), SessionError> {
        let content = validate_content(raw, self.settings.max_message_length)?;

        let snapshot = read_snapshot(&self.snapshot);
        if snapshot.id != self.conversation_id {
            return Err(SessionError::InvalidState("snapshot does not match connection"));
        }

        let user_message = self
            .store
            .create_message(snapshot.id, &NewMessage::user(content))
            .await?;
        debug!(message_id = %user_message.id, "Stored user message");

        let history =
            bounded_history(&*self.store, &self.budgeter, &snapshot, snapshot.id).await?;
        let prompt = build_prompt(&snapshot, &history.messages);

        let reply = match tokio::time::timeout(
            self.settings.ai_stream_timeout,
            self.stream_reply(prompt, &snapshot, token),
        )
        .await
        {
            Ok(reply) => reply?,
            Err(_) => return Err(SessionError::AiTimeout),
        };

        let assistant = self
            .store
            .create_message(
                snapshot.id,
                &NewMessage::assistant(reply.text.clone(), snapshot.model.clone(), reply.usage),
            )
            .await?;
        self.outbox.send(ServerFrame::done(assistant.id)).await?;

        let completion_tokens = reply.usage.map_or(0, |u| u.output_tokens as usize);
        let updated_total = history.total_tokens + completion_tokens;
        info!(
            message_id = %assistant.id,
            history_messages = history.messages.len(),
            total_tokens = updated_total,
            "Exchange complete"
        );

        if self.budgeter.should_summarize(updated_total, &snapshot.model) {
            let mut covered = history.messages;
            covered.push(PromptMessage::assistant(reply.text));
            self.summaries.schedule(
                snapshot.id,
                covered,
                snapshot.model,
                u32::try_from(updated_total).unwrap_or(u32::MAX),
            );
        }
        Ok(())
    }

    /// Forward deltas as they arrive and collect the full reply.
    async fn stream_reply(
        &self,
        prompt: Vec<PromptMessage>,
        snapshot: &ConversationSnapshot,
        token: &CancellationToken,
    ) -> Result<Reply, SessionError> {
        let mut events = self.ai.stream(prompt, &snapshot.model, snapshot.temperature);
        let mut text = String::new();
        let mut usage = None;

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Err(SessionError::Cancelled),
                event = events.next() => event,
            };
            match event {
                None => break,
                Some(Ok(StreamEvent::TextDelta { text: delta })) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    self.outbox.send(ServerFrame::delta(delta)).await?;
                }
                Some(Ok(StreamEvent::Usage(reported))) => usage = Some(reported),
                Some(Err(err)) => return Err(err.into()),
            }
        }

        Ok(Reply { text, usage })
    }
}

/// Starts best-effort summaries, at most one at a time per connection.
pub(crate) struct SummaryScheduler<S> {
    pub(crate) summarizer: Summarizer<S>,
    pub(crate) slot: SummarySlot,
    pub(crate) snapshot: SharedSnapshot,
    pub(crate) parent: CancellationToken,
    pub(crate) span: Span,
}

impl<S: ConversationStore + 'static> SummaryScheduler<S> {
    /// Summarize `messages` in the background. Dropped if a summary is
    /// already running.
    pub(crate) fn schedule(
        &self,
        conversation_id: Uuid,
        messages: Vec<PromptMessage>,
        model: String,
        token_count: u32,
    ) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(%conversation_id, "Summary already in flight, dropping request");
            return;
        }

        let summarizer = self.summarizer.clone();
        let snapshot = Arc::clone(&self.snapshot);
        *slot = Some(BackgroundTask::spawn(
            "summary",
            &self.parent,
            self.span.clone(),
            move |token| async move {
                let generated = tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Summary cancelled before completion");
                        return;
                    }
                    generated = summarizer.generate(&messages, &model) => generated,
                };

                let stored = match generated {
                    Ok(summary) => summarizer
                        .store(conversation_id, &summary, token_count)
                        .await
                        .map(|()| summary),
                    Err(err) => Err(err),
                };

                match stored {
                    Ok(summary) => {
                        let mut current = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
                        current.summary = Some(summary);
                        current.summary_token_count = token_count;
                        info!(%conversation_id, token_count, "Conversation summarized");
                    }
                    Err(err) => warn!(%conversation_id, error = %err, "Summarization failed"),
                }
            },
        ));
    }
}
