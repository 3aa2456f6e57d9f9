//! Credential validation ports.
//!
//! The session engine only needs `resolve_user`; the revocation list and
//! user directory are the collaborators a validator consults.

use uuid::Uuid;

use banter_types::error::{AuthError, RepositoryError};
use banter_types::user::{TokenPurpose, User};

/// Turns a presented credential into a user.
pub trait CredentialValidator: Send + Sync {
    /// Verify integrity and expiry, check the declared purpose against
    /// `expected`, reject revoked credentials, and resolve the user.
    fn resolve_user(
        &self,
        token: &str,
        expected: TokenPurpose,
    ) -> impl std::future::Future<Output = Result<User, AuthError>> + Send;
}

/// Credential identifiers that must no longer be honored.
///
/// Read on every authentication and written on logout, so writes must be
/// visible to every connection promptly.
pub trait RevocationList: Send + Sync {
    fn is_revoked(
        &self,
        token_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn revoke(
        &self,
        token_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

pub trait UserDirectory: Send + Sync {
    /// Active user by id; inactive users resolve to `None`.
    fn find_active(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<User>, RepositoryError>> + Send;
}
