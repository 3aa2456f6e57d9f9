//! WebSocket handler for chat sessions.
//!
//! `/ws/chat/{conversation_id}` upgrades unconditionally and hands the
//! socket to a [`SessionEngine`]; the identifier is validated by the engine
//! after accept so a malformed one gets a proper close code.
//!
//! The socket is split in two. A writer task drains the engine's outbox and
//! serializes frames; the read half is adapted into a stream of text
//! payloads. Binary payloads are decoded as lossy UTF-8.

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use banter_core::session::{Outbound, Outbox, SessionEngine};

use crate::state::AppState;

/// Outbound frames buffered per connection before the engine waits.
const OUTBOX_CAPACITY: usize = 64;

/// How long the writer may keep flushing after the session ended.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(5);

type InboundText = Pin<Box<dyn Stream<Item = String> + Send>>;

/// GET /ws/chat/{conversation_id}
pub async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| {
        sessions.track_future(handle_chat_socket(socket, conversation_id, state))
    })
}

async fn handle_chat_socket(socket: WebSocket, raw_conversation_id: String, state: AppState) {
    let (mut ws_sender, ws_receiver) = socket.split();
    let (outbox, outbound_rx) = Outbox::channel(OUTBOX_CAPACITY);

    let mut writer = tokio::spawn(async move {
        write_outbound(&mut ws_sender, outbound_rx).await;
        let _ = ws_sender.close().await;
    });

    let engine = SessionEngine::new(state.services.clone(), outbox, &state.shutdown);
    engine
        .run(&raw_conversation_id, inbound_text(ws_receiver))
        .await;

    // The engine and its tasks are gone, so the outbox is closed and the
    // writer ends once it has flushed what is queued.
    if tokio::time::timeout(WRITER_DRAIN_GRACE, &mut writer)
        .await
        .is_err()
    {
        tracing::warn!(conversation_id = %raw_conversation_id, "WebSocket writer stalled, aborting");
        writer.abort();
    }

    tracing::debug!(conversation_id = %raw_conversation_id, "WebSocket connection closed");
}

/// Serialize outbound items onto the socket until the outbox closes, a
/// close is requested, or the peer is gone.
async fn write_outbound<S>(sender: &mut S, mut outbound_rx: mpsc::Receiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(outbound) = outbound_rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                let json = match frame.to_json() {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!("Failed to serialize server frame: {err}");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close(code) => {
                let frame = CloseFrame {
                    code: code.code(),
                    reason: code.reason().into(),
                };
                let _ = sender.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

/// Text payloads from the socket, ending at the first close or error.
fn inbound_text<S, E>(mut receiver: S) -> InboundText
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send,
{
    Box::pin(async_stream::stream! {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => yield text.as_str().to_owned(),
                Ok(Message::Binary(bytes)) => yield String::from_utf8_lossy(&bytes).into_owned(),
                Ok(Message::Close(_)) => break,
                // Protocol-level ping/pong is answered by the transport.
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!("WebSocket receive error: {err}");
                    break;
                }
            }
        }
    })
}
