//! Application state wiring.
//!
//! [`AppContext`] holds what every command needs (config, database,
//! credential store). [`AppState`] adds the per-process session
//! collaborators the server hands to each connection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use banter_core::llm::client::AiClient;
use banter_core::llm::retry::RetryPolicy;
use banter_core::llm::token_budget::TokenBudgeter;
use banter_core::ratelimit::store::BoxWindowStore;
use banter_core::ratelimit::{FallbackPolicy, RateLimiter};
use banter_core::session::{SessionServices, SessionSettings};
use banter_infra::auth::JwtCredentialValidator;
use banter_infra::llm::create_provider;
use banter_infra::sqlite::conversation::SqliteConversationStore;
use banter_infra::sqlite::credential::SqliteCredentialStore;
use banter_infra::sqlite::pool::DatabasePool;
use banter_infra::sqlite::rate_limit::SqliteWindowStore;
use banter_types::config::{BanterConfig, RateLimitConfig};

pub type ConcreteValidator = JwtCredentialValidator<SqliteCredentialStore, SqliteCredentialStore>;

pub type ConcreteServices = SessionServices<SqliteConversationStore, ConcreteValidator>;

pub struct AppContext {
    pub config: BanterConfig,
    pub db_pool: DatabasePool,
    pub credentials: Arc<SqliteCredentialStore>,
}

impl AppContext {
    /// Open the database (running migrations) and the credential store.
    pub async fn init(config: BanterConfig) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(&config.database.url)
            .await
            .with_context(|| format!("failed to open database {}", config.database.url))?;

        let credentials = Arc::new(SqliteCredentialStore::new(db_pool.clone()));

        Ok(Self {
            config,
            db_pool,
            credentials,
        })
    }

    pub fn validator(&self) -> anyhow::Result<ConcreteValidator> {
        let secret = self
            .config
            .auth
            .jwt_secret
            .clone()
            .filter(|s| !s.is_empty())
            .context("no JWT secret configured (set [auth] jwt_secret or BANTER_JWT_SECRET)")?;

        Ok(JwtCredentialValidator::new(
            SecretString::from(secret),
            Arc::clone(&self.credentials),
            Arc::clone(&self.credentials),
        ))
    }
}

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: ConcreteServices,
    /// Root token; cancelling it ends every live session.
    pub shutdown: CancellationToken,
    /// Upgraded WebSocket sessions, awaited before the pool closes.
    pub sessions: TaskTracker,
}

impl AppState {
    pub fn build(ctx: &AppContext, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let config = &ctx.config;

        let provider =
            create_provider(&config.ai).context("no completion provider API key configured")?;
        let retry = RetryPolicy::new(
            config.ai.max_attempts,
            Duration::from_secs(config.ai.backoff_min_secs),
            Duration::from_secs(config.ai.backoff_max_secs),
        );

        let limiter = RateLimiter::new(
            BoxWindowStore::new(SqliteWindowStore::new(ctx.db_pool.clone())),
            fallback_policy(&config.rate_limit),
        );

        let services = SessionServices::new(
            Arc::new(
                SqliteConversationStore::new(ctx.db_pool.clone())
                    .with_max_message_length(config.session.max_message_length),
            ),
            Arc::new(ctx.validator()?),
            Arc::new(limiter),
            Arc::new(AiClient::new(provider, retry)),
            Arc::new(TokenBudgeter::default()),
            SessionSettings::from_config(&config.session, &config.rate_limit, &config.ai),
        );

        Ok(Self {
            services,
            shutdown,
            sessions: TaskTracker::new(),
        })
    }
}

fn fallback_policy(config: &RateLimitConfig) -> FallbackPolicy {
    if config.fail_closed {
        FallbackPolicy::FailClosed {
            retry_after_secs: config.fail_closed_retry_after_secs,
        }
    } else {
        FallbackPolicy::FailOpen
    }
}
