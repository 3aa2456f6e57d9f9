//! Cancellable background tasks owned by a session.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, warn};

use banter_types::protocol::ServerFrame;

use super::Outbox;

/// A spawned task paired with the token that stops it.
///
/// The token is a child of the session token, so tearing down the session
/// (or the whole server) reaches every task.
pub(crate) struct BackgroundTask {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, span: Span, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(f(token.clone()).instrument(span));
        Self {
            name,
            token,
            handle,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait up to `grace`; a task still running after that is
    /// detached.
    pub(crate) async fn shutdown(self, grace: Duration) {
        let Self {
            name,
            token,
            handle,
        } = self;
        token.cancel();

        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => debug!(task = name, "Background task stopped"),
            Ok(Err(err)) if err.is_cancelled() => debug!(task = name, "Background task aborted"),
            Ok(Err(err)) => error!(task = name, error = %err, "Background task panicked"),
            Err(_) => warn!(
                task = name,
                grace_ms = grace.as_millis() as u64,
                "Background task ignored cancellation, detaching"
            ),
        }
    }
}

/// Ping the client every `interval` until cancelled or the reply path
/// closes.
pub(crate) fn spawn_heartbeat(
    interval: Duration,
    outbox: Outbox,
    parent: &CancellationToken,
    span: Span,
) -> BackgroundTask {
    BackgroundTask::spawn("heartbeat", parent, span, move |token| async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = outbox.send(ServerFrame::Ping).await {
                        warn!(error = %err, "Heartbeat send failed, stopping");
                        break;
                    }
                }
            }
        }
    })
}
