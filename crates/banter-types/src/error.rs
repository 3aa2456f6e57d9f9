//! Error types shared across Banter crates.

use crate::user::TokenPurpose;

/// Errors from repository (persistence) operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Reasons a credential does not resolve to a user.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token expired")]
    Expired,

    #[error("token purpose mismatch: expected {expected}, got {actual}")]
    WrongPurpose {
        expected: TokenPurpose,
        actual: TokenPurpose,
    },

    #[error("token revoked")]
    Revoked,

    #[error("user not found or inactive")]
    UnknownUser,

    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

/// The shared rate-limit window store could not be reached.
#[derive(Debug, thiserror::Error)]
#[error("rate limit store unavailable: {0}")]
pub struct WindowStoreError(pub String);
