//! SQLite-backed users and token revocation list.

use banter_core::auth::{RevocationList, UserDirectory};
use banter_types::error::RepositoryError;
use banter_types::user::User;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

pub struct SqliteCredentialStore {
    pool: DatabasePool,
}

impl SqliteCredentialStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn create_user(&self, username: &str) -> Result<User, RepositoryError> {
        let user = User {
            id: Uuid::now_v7(),
            username: username.to_string(),
            is_active: true,
        };

        let result = sqlx::query(
            "INSERT INTO users (id, username, is_active, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => Err(
                RepositoryError::Conflict(format!("username '{username}' already exists")),
            ),
            Err(e) => Err(query_error(e)),
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, username, is_active FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Existing user by name, or a freshly created one.
    pub async fn ensure_user(&self, username: &str) -> Result<User, RepositoryError> {
        match self.find_by_username(username).await? {
            Some(user) => Ok(user),
            None => self.create_user(username).await,
        }
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    Ok(User {
        id: Uuid::parse_str(&id)
            .map_err(|e| RepositoryError::Query(format!("invalid user id: {e}")))?,
        username: row.try_get("username").map_err(query_error)?,
        is_active: row.try_get("is_active").map_err(query_error)?,
    })
}

impl UserDirectory for SqliteCredentialStore {
    async fn find_active(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, username, is_active FROM users WHERE id = ? AND is_active = 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(user_from_row).transpose()
    }
}

impl RevocationList for SqliteCredentialStore {
    async fn is_revoked(&self, token_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM token_blacklist WHERE jti = ?")
            .bind(token_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }

    async fn revoke(&self, token_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("INSERT OR IGNORE INTO token_blacklist (jti, revoked_at) VALUES (?, ?)")
            .bind(token_id)
            .bind(format_datetime(&Utc::now()))
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        tracing::info!(jti = token_id, "Token revoked");
        Ok(())
    }
}
