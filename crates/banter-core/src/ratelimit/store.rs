//! Window store trait and its boxed wrapper.
//!
//! A store performs prune + count + conditional insert as one atomic step
//! so two connections checking the same key cannot both slip under the
//! limit.

use std::future::Future;
use std::pin::Pin;

use banter_types::error::WindowStoreError;

/// Result of one atomic admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Requests in the window after this attempt.
    pub count: u32,
    /// Oldest surviving timestamp (ms) when the attempt was denied.
    pub oldest_ms: Option<i64>,
}

pub trait WindowStore: Send + Sync {
    fn name(&self) -> &str;

    /// Drop entries at or before `now_ms - window_ms`, then record `now_ms`
    /// iff fewer than `max_requests` remain.
    fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u32,
    ) -> impl Future<Output = Result<WindowDecision, WindowStoreError>> + Send;
}

/// Object-safe version of [`WindowStore`].
pub trait WindowStoreDyn: Send + Sync {
    fn name(&self) -> &str;

    fn admit_boxed<'a>(
        &'a self,
        key: &'a str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u32,
    ) -> Pin<Box<dyn Future<Output = Result<WindowDecision, WindowStoreError>> + Send + 'a>>;
}

impl<T: WindowStore> WindowStoreDyn for T {
    fn name(&self) -> &str {
        WindowStore::name(self)
    }

    fn admit_boxed<'a>(
        &'a self,
        key: &'a str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u32,
    ) -> Pin<Box<dyn Future<Output = Result<WindowDecision, WindowStoreError>> + Send + 'a>> {
        Box::pin(self.admit(key, now_ms, window_ms, max_requests))
    }
}

/// Type-erased window store chosen at startup.
pub struct BoxWindowStore {
    inner: Box<dyn WindowStoreDyn + Send + Sync>,
}

impl BoxWindowStore {
    pub fn new<T: WindowStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u32,
    ) -> Result<WindowDecision, WindowStoreError> {
        self.inner.admit_boxed(key, now_ms, window_ms, max_requests).await
    }
}
