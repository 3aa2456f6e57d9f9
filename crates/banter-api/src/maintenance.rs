//! Background upkeep: rate-limit window pruning and session draining.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use banter_core::ratelimit::RateLimiter;
use banter_infra::sqlite::rate_limit::SqliteWindowStore;

/// Every `window`, drop window entries that can no longer affect a
/// decision, both in the shared store and in the limiter's fallback.
pub fn spawn_window_purge(
    store: SqliteWindowStore,
    limiter: Arc<RateLimiter>,
    window: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = window.max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now_ms = Utc::now().timestamp_millis();
                    match store.purge_expired(now_ms, window.as_millis() as i64).await {
                        Ok(0) => {}
                        Ok(removed) => tracing::debug!(removed, "Purged expired rate-limit events"),
                        Err(err) => tracing::warn!(error = %err, "Rate-limit purge failed"),
                    }
                    limiter.purge_expired(window);
                }
            }
        }
    })
}

/// Stop accepting new sessions and wait up to `grace` for live ones to
/// finish their teardown. Returns `false` if some were still running.
pub async fn drain_sessions(sessions: &TaskTracker, grace: Duration) -> bool {
    sessions.close();
    let drained = tokio::time::timeout(grace, sessions.wait()).await.is_ok();
    if !drained {
        tracing::warn!(
            remaining = sessions.len(),
            "Sessions still running after shutdown grace"
        );
    }
    drained
}
