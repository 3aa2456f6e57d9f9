//! The connection state machine.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, field, info, info_span};
use uuid::Uuid;

use banter_types::chat::ConversationSnapshot;
use banter_types::error::{AuthError, RepositoryError};
use banter_types::protocol::{ClientFrame, CloseCode, ServerFrame};
use banter_types::user::{TokenPurpose, User};

use crate::auth::CredentialValidator;
use crate::chat::repository::ConversationStore;
use crate::chat::summarizer::Summarizer;

use super::error::SessionError;
use super::exchange::{Exchange, SharedSnapshot, SummaryScheduler, SummarySlot};
use super::tasks::{self, BackgroundTask};
use super::{ConnectionState, Outbox, SessionServices};

/// Signals from background tasks to the read loop.
#[derive(Debug)]
enum Control {
    AuthDeadlineElapsed,
}

struct AuthContext {
    user: User,
    snapshot: SharedSnapshot,
}

/// Drives one connection from accept to close.
///
/// Frames are handled strictly in arrival order on the read loop; only the
/// chat exchange and the background tasks run elsewhere.
pub struct SessionEngine<S, V> {
    services: SessionServices<S, V>,
    outbox: Outbox,
    /// Child of the server shutdown token; cancelled on teardown.
    cancel: CancellationToken,
    state: ConnectionState,
    auth: Option<AuthContext>,
    /// Held by the in-flight exchange.
    gate: Arc<tokio::sync::Mutex<()>>,
    deadline: Option<BackgroundTask>,
    heartbeat: Option<BackgroundTask>,
    exchange: Option<BackgroundTask>,
    summary: SummarySlot,
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    span: Span,
}

impl<S, V> SessionEngine<S, V>
where
    S: ConversationStore + 'static,
    V: CredentialValidator + 'static,
{
    pub fn new(services: SessionServices<S, V>, outbox: Outbox, shutdown: &CancellationToken) -> Self {
        let (control_tx, control_rx) = mpsc::channel(4);
        let span = info_span!(
            "session",
            connection_id = %Uuid::new_v4(),
            conversation_id = field::Empty,
            user_id = field::Empty,
        );
        Self {
            services,
            outbox,
            cancel: shutdown.child_token(),
            state: ConnectionState::Connecting,
            auth: None,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            deadline: None,
            heartbeat: None,
            exchange: None,
            summary: Arc::new(Mutex::new(None)),
            control_tx,
            control_rx,
            span,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve the connection until the client leaves, a fatal error closes
    /// it, or the server shuts down.
    ///
    /// `raw_conversation_id` is the identifier from the connection target.
    pub async fn run<I>(mut self, raw_conversation_id: &str, inbound: I)
    where
        I: Stream<Item = String> + Unpin + Send,
    {
        let span = self.span.clone();
        span.record("conversation_id", raw_conversation_id);
        async move {
            match Uuid::parse_str(raw_conversation_id) {
                Ok(conversation_id) => self.serve(conversation_id, inbound).await,
                Err(err) => {
                    debug!(error = %err, "Rejecting malformed conversation id");
                    let _ = self.outbox.close(CloseCode::MalformedIdentifier).await;
                }
            }
            self.teardown().await;
        }
        .instrument(span)
        .await
    }

    async fn serve<I>(&mut self, conversation_id: Uuid, mut inbound: I)
    where
        I: Stream<Item = String> + Unpin + Send,
    {
        self.state = ConnectionState::AwaitingAuth;
        self.deadline = Some(self.spawn_auth_deadline());
        debug!("Awaiting authentication");

        loop {
            let flow = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Server shutting down, ending session");
                    ControlFlow::Break(())
                }
                Some(control) = self.control_rx.recv() => self.on_control(control).await,
                frame = inbound.next() => match frame {
                    Some(text) => self.on_frame(conversation_id, &text).await,
                    None => {
                        debug!("Client disconnected");
                        ControlFlow::Break(())
                    }
                },
            };
            if flow.is_break() {
                break;
            }
        }
    }

    fn spawn_auth_deadline(&self) -> BackgroundTask {
        let timeout = self.services.settings.auth_timeout;
        let control = self.control_tx.clone();
        BackgroundTask::spawn("auth_deadline", &self.cancel, self.span.clone(), move |token| async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let _ = control.send(Control::AuthDeadlineElapsed).await;
                }
            }
        })
    }

    async fn on_control(&mut self, control: Control) -> ControlFlow<()> {
        match control {
            // A deadline that fires while a valid auth is being processed
            // loses to it.
            Control::AuthDeadlineElapsed if self.state == ConnectionState::AwaitingAuth => {
                self.reject(SessionError::AuthTimeout).await
            }
            Control::AuthDeadlineElapsed => ControlFlow::Continue(()),
        }
    }

    async fn on_frame(&mut self, conversation_id: Uuid, text: &str) -> ControlFlow<()> {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => return self.reject(err.into()).await,
        };

        match (self.state, frame) {
            (_, ClientFrame::Pong) => ControlFlow::Continue(()),
            (ConnectionState::AwaitingAuth, ClientFrame::Auth { token }) => {
                self.authenticate(conversation_id, token.as_deref().unwrap_or_default())
                    .await
            }
            (ConnectionState::AwaitingAuth, _) => self.notify(SessionError::AuthRequired).await,
            (_, ClientFrame::Auth { .. }) => {
                debug!("Ignoring auth on an authenticated session");
                ControlFlow::Continue(())
            }
            (_, ClientFrame::Unknown { kind }) => self.notify(SessionError::UnknownType(kind)).await,
            (_, ClientFrame::ChatMessage { content }) => self.dispatch_chat(conversation_id, content).await,
        }
    }

    async fn authenticate(&mut self, conversation_id: Uuid, token: &str) -> ControlFlow<()> {
        if token.trim().is_empty() {
            return self.reject(SessionError::MissingToken).await;
        }

        let user = match self
            .services
            .validator
            .resolve_user(token, TokenPurpose::Access)
            .await
        {
            Ok(user) => user,
            Err(AuthError::Lookup(reason)) => {
                return self
                    .reject(SessionError::Storage(RepositoryError::Connection(reason)))
                    .await;
            }
            Err(err) => return self.reject(err.into()).await,
        };

        let conversation = match self.services.store.get_conversation(conversation_id, user.id).await {
            Ok(conversation) => conversation,
            Err(RepositoryError::NotFound) => return self.reject(SessionError::NotFound).await,
            Err(err) => return self.reject(err.into()).await,
        };

        self.span.record("user_id", field::display(user.id));
        self.auth = Some(AuthContext {
            user,
            snapshot: Arc::new(Mutex::new(ConversationSnapshot::from(&conversation))),
        });
        self.state = ConnectionState::Authenticated;

        // The deadline must be gone before the heartbeat starts.
        if let Some(deadline) = self.deadline.take() {
            deadline.shutdown(self.services.settings.task_cancel_grace).await;
        }
        info!(model = %conversation.model, "Session authenticated");

        if self
            .outbox
            .send(ServerFrame::AuthSuccess { conversation_id })
            .await
            .is_err()
        {
            return ControlFlow::Break(());
        }

        self.heartbeat = Some(tasks::spawn_heartbeat(
            self.services.settings.heartbeat_interval,
            self.outbox.clone(),
            &self.cancel,
            self.span.clone(),
        ));
        ControlFlow::Continue(())
    }

    async fn dispatch_chat(&mut self, conversation_id: Uuid, content: String) -> ControlFlow<()> {
        let Some(auth) = &self.auth else {
            return self.notify(SessionError::NoConversation).await;
        };
        let snapshot = Arc::clone(&auth.snapshot);

        let settings = &self.services.settings;
        let decision = self
            .services
            .limiter
            .check(
                &auth.user.id.to_string(),
                "message",
                settings.rate_limit_max,
                settings.rate_limit_window,
            )
            .await;
        if !decision.allowed {
            return self
                .notify(SessionError::RateLimited {
                    retry_after: decision.retry_after_secs,
                })
                .await;
        }

        let Ok(gate) = Arc::clone(&self.gate).try_lock_owned() else {
            return self.notify(SessionError::AlreadyProcessing).await;
        };

        let exchange = Exchange {
            conversation_id,
            store: Arc::clone(&self.services.store),
            ai: Arc::clone(&self.services.ai),
            budgeter: Arc::clone(&self.services.budgeter),
            settings: self.services.settings.clone(),
            outbox: self.outbox.clone(),
            snapshot: Arc::clone(&snapshot),
            summaries: SummaryScheduler {
                summarizer: Summarizer::new(
                    Arc::clone(&self.services.ai),
                    Arc::clone(&self.services.store),
                    self.services.settings.summary_temperature,
                    self.services.settings.summary_max_tokens,
                ),
                slot: Arc::clone(&self.summary),
                snapshot,
                parent: self.cancel.clone(),
                span: self.span.clone(),
            },
        };

        // The previous exchange released the gate, so its task is done.
        self.exchange = Some(BackgroundTask::spawn(
            "exchange",
            &self.cancel,
            self.span.clone(),
            move |token| exchange.run(content, gate, token),
        ));
        ControlFlow::Continue(())
    }

    /// Report a non-fatal error. Breaks only if the reply path is gone.
    async fn notify(&self, err: SessionError) -> ControlFlow<()> {
        err.log();
        match err.frame() {
            Some(frame) => match self.outbox.send(frame).await {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            },
            None => ControlFlow::Continue(()),
        }
    }

    /// Report a fatal error and close the connection.
    async fn reject(&mut self, err: SessionError) -> ControlFlow<()> {
        err.log();
        let close = err.close_code().unwrap_or(CloseCode::InternalError);
        if let Some(frame) = err.frame() {
            let _ = self.outbox.send(frame).await;
        }
        let _ = self.outbox.close(close).await;
        self.state = ConnectionState::Closed;
        ControlFlow::Break(())
    }

    async fn teardown(&mut self) {
        self.state = ConnectionState::Closed;
        self.cancel.cancel();

        let grace = self.services.settings.task_cancel_grace;
        let owned = [self.deadline.take(), self.heartbeat.take(), self.exchange.take()];
        for task in owned.into_iter().flatten() {
            task.shutdown(grace).await;
        }

        let summary = self
            .summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = summary {
            task.shutdown(grace).await;
        }
        info!("Session closed");
    }
}
