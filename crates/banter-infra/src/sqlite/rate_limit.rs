//! Shared sliding-window store in SQLite.
//!
//! Each admission is one transaction on the single-connection writer pool,
//! so prune + count + conditional insert cannot interleave across
//! connections.

use banter_core::ratelimit::store::{WindowDecision, WindowStore};
use banter_types::error::WindowStoreError;

use super::pool::DatabasePool;

pub struct SqliteWindowStore {
    pool: DatabasePool,
}

impl SqliteWindowStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Delete every entry older than `window_ms` across all keys.
    pub async fn purge_expired(&self, now_ms: i64, window_ms: i64) -> Result<u64, WindowStoreError> {
        let result = sqlx::query("DELETE FROM rate_limit_events WHERE ts_ms <= ?")
            .bind(now_ms - window_ms)
            .execute(&self.pool.writer)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }
}

fn store_error(e: sqlx::Error) -> WindowStoreError {
    WindowStoreError(e.to_string())
}

impl WindowStore for SqliteWindowStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_requests: u32,
    ) -> Result<WindowDecision, WindowStoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(store_error)?;

        sqlx::query("DELETE FROM rate_limit_events WHERE key = ? AND ts_ms <= ?")
            .bind(key)
            .bind(now_ms - window_ms)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        let (count, oldest): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(ts_ms) FROM rate_limit_events WHERE key = ?")
                .bind(key)
                .fetch_one(&mut *tx)
                .await
                .map_err(store_error)?;

        let allowed = count < i64::from(max_requests);
        if allowed {
            sqlx::query("INSERT INTO rate_limit_events (key, ts_ms) VALUES (?, ?)")
                .bind(key)
                .bind(now_ms)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)?;

        Ok(WindowDecision {
            allowed,
            count: (count + i64::from(allowed)) as u32,
            oldest_ms: if allowed { None } else { oldest },
        })
    }
}
