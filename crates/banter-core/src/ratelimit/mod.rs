//! Sliding-window rate limiting.
//!
//! `RateLimiter::check` admits or denies one request for an
//! `(identifier, action)` pair. The count lives in a shared primary store;
//! when that store is unreachable the limiter follows its
//! [`FallbackPolicy`].

pub mod memory;
pub mod store;

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use self::memory::InMemoryWindowStore;
use self::store::{BoxWindowStore, WindowDecision};

/// What to do when the primary store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Deny every request with a fixed retry-after.
    FailClosed { retry_after_secs: u64 },
    /// Approximate the window in-process.
    FailOpen,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Zero when allowed, at least one otherwise.
    pub retry_after_secs: u64,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_secs.max(1),
        }
    }
}

pub struct RateLimiter {
    primary: Option<BoxWindowStore>,
    local: InMemoryWindowStore,
    policy: FallbackPolicy,
}

impl RateLimiter {
    /// A limiter backed by a shared store.
    pub fn new(primary: BoxWindowStore, policy: FallbackPolicy) -> Self {
        Self {
            primary: Some(primary),
            local: InMemoryWindowStore::new(),
            policy,
        }
    }

    /// A limiter that only counts within this process.
    pub fn in_process() -> Self {
        Self {
            primary: None,
            local: InMemoryWindowStore::new(),
            policy: FallbackPolicy::FailOpen,
        }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub async fn check(
        &self,
        identifier: &str,
        action: &str,
        max_requests: u32,
        window: Duration,
    ) -> RateDecision {
        self.check_at(identifier, action, max_requests, window, Utc::now().timestamp_millis())
            .await
    }

    /// [`check`](Self::check) with an explicit clock.
    pub async fn check_at(
        &self,
        identifier: &str,
        action: &str,
        max_requests: u32,
        window: Duration,
        now_ms: i64,
    ) -> RateDecision {
        let key = format!("{action}:{identifier}");
        let window_ms = window.as_millis() as i64;

        let decision = match &self.primary {
            None => self.local.admit_now(&key, now_ms, window_ms, max_requests),
            Some(primary) => match primary.admit(&key, now_ms, window_ms, max_requests).await {
                Ok(decision) => decision,
                Err(err) => match self.policy {
                    FallbackPolicy::FailClosed { retry_after_secs } => {
                        error!(
                            store = primary.name(),
                            %key,
                            error = %err,
                            "Rate limit store unavailable, denying request (fail-closed)"
                        );
                        return RateDecision::deny(retry_after_secs);
                    }
                    FallbackPolicy::FailOpen => {
                        warn!(
                            store = primary.name(),
                            %key,
                            error = %err,
                            "Rate limit store unavailable, using in-process window (fail-open)"
                        );
                        self.local.admit_now(&key, now_ms, window_ms, max_requests)
                    }
                },
            },
        };

        if decision.allowed {
            return RateDecision::allow();
        }

        let retry_after = retry_after_secs(&decision, now_ms, window_ms);
        debug!(%key, count = decision.count, retry_after, "Rate limit exceeded");
        RateDecision::deny(retry_after)
    }

    /// Forget in-process windows that have fully expired.
    pub fn purge_expired(&self, window: Duration) {
        self.local
            .purge_expired(Utc::now().timestamp_millis(), window.as_millis() as i64);
    }
}

/// Seconds until the oldest surviving entry leaves the window, plus one.
fn retry_after_secs(decision: &WindowDecision, now_ms: i64, window_ms: i64) -> u64 {
    match decision.oldest_ms {
        Some(oldest) => {
            let remaining_ms = (oldest + window_ms - now_ms).max(0);
            (remaining_ms / 1_000) as u64 + 1
        }
        None => 1,
    }
}
