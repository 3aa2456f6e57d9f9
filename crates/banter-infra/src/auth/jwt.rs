//! HS256 JWT credential validator.
//!
//! Tokens carry the user id, their purpose, and a unique `jti` that the
//! revocation list is keyed on. Resolution runs decode, purpose check,
//! revocation lookup and user lookup in that order.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use banter_core::auth::{CredentialValidator, RevocationList, UserDirectory};
use banter_types::error::AuthError;
use banter_types::user::{TokenPurpose, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    user_id: Uuid,
    token_type: TokenPurpose,
    jti: String,
    exp: i64,
    iat: i64,
}

/// A freshly signed token and the identifiers needed to revoke it later.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

pub struct JwtCredentialValidator<R: RevocationList, U: UserDirectory> {
    secret: SecretString,
    revocations: Arc<R>,
    users: Arc<U>,
}

impl<R: RevocationList, U: UserDirectory> JwtCredentialValidator<R, U> {
    pub fn new(secret: SecretString, revocations: Arc<R>, users: Arc<U>) -> Self {
        Self {
            secret,
            revocations,
            users,
        }
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue(
        &self,
        user_id: Uuid,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = Claims {
            user_id,
            token_type: purpose,
            jti: Uuid::new_v4().to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let key = EncodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map_err(|e| AuthError::Invalid(format!("JWT encode: {e}")))?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let key = DecodingKey::from_secret(self.secret.expose_secret().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;

        jsonwebtoken::decode::<Claims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

impl<R: RevocationList, U: UserDirectory> CredentialValidator for JwtCredentialValidator<R, U> {
    async fn resolve_user(&self, token: &str, expected: TokenPurpose) -> Result<User, AuthError> {
        let claims = self.decode(token)?;

        if claims.token_type != expected {
            return Err(AuthError::WrongPurpose {
                expected,
                actual: claims.token_type,
            });
        }

        let revoked = self
            .revocations
            .is_revoked(&claims.jti)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))?;
        if revoked {
            tracing::debug!(jti = %claims.jti, "Rejected revoked token");
            return Err(AuthError::Revoked);
        }

        self.users
            .find_active(claims.user_id)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))?
            .ok_or(AuthError::UnknownUser)
    }
}
