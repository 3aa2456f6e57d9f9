//! In-process sliding window store.
//!
//! Each key's timestamps live in a `VecDeque` behind a DashMap shard lock;
//! holding the entry guard makes prune + count + insert atomic per key.

use std::collections::VecDeque;

use dashmap::DashMap;

use banter_types::error::WindowStoreError;

use super::store::{WindowDecision, WindowStore};

#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, VecDeque<i64>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous admission used by the async trait method.
    pub fn admit_now(&self, key: &str, now_ms: i64, window_ms: i64, max_requests: u32) -> WindowDecision {
        let cutoff = now_ms - window_ms;
        let mut entry = self.windows.entry(key.to_string()).or_default();
        let timestamps = entry.value_mut();

        while timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            timestamps.pop_front();
        }

        if (timestamps.len() as u32) < max_requests {
            timestamps.push_back(now_ms);
            WindowDecision {
                allowed: true,
                count: timestamps.len() as u32,
                oldest_ms: None,
            }
        } else {
            WindowDecision {
                allowed: false,
                count: timestamps.len() as u32,
                oldest_ms: timestamps.front().copied(),
            }
        }
    }

    /// Drop keys whose newest entry has left the window.
    pub fn purge_expired(&self, now_ms: i64, window_ms: i64) {
        let cutoff = now_ms - window_ms;
        self.windows
            .retain(|_, timestamps| timestamps.back().is_some_and(|&ts| ts > cutoff));
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl WindowStore for InMemoryWindowStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u32,
    ) -> Result<WindowDecision, WindowStoreError> {
        Ok(self.admit_now(key, now_ms, window_ms, max_requests))
    }
}
