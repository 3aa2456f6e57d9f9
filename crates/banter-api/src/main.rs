//! Banter server and CLI entry point.
//!
//! Binary name: `banter`
//!
//! Loads configuration, installs tracing, then dispatches to the chosen
//! command: serving chat sessions, running migrations, or token admin.

mod cli;
mod http;
mod maintenance;
mod state;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use banter_core::auth::RevocationList;
use banter_infra::config::load_config;
use banter_infra::sqlite::rate_limit::SqliteWindowStore;
use banter_observe::tracing_setup::{init_tracing, shutdown_tracing};
use banter_types::config::BanterConfig;

use cli::{Cli, Commands};
use state::{AppContext, AppState};

/// How long live sessions get to tear down after shutdown is requested.
const SESSION_DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config loading may warn before the real subscriber exists.
    let bootstrap = tracing_subscriber::fmt().with_target(false).finish();
    let config = {
        let _guard = tracing::subscriber::set_default(bootstrap);
        load_config(&cli.config).await
    };

    let format = cli
        .log_format
        .map(Into::into)
        .unwrap_or(config.logging.format);
    init_tracing(format, config.logging.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli.command, config).await;
    shutdown_tracing();
    result
}

async fn run(command: Commands, config: BanterConfig) -> anyhow::Result<()> {
    let ctx = AppContext::init(config).await?;

    match command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| ctx.config.server.host.clone());
            let port = port.unwrap_or(ctx.config.server.port);
            serve(&ctx, &host, port).await?;
        }

        Commands::Migrate => {
            tracing::info!(url = %ctx.config.database.url, "Database schema is up to date");
        }

        Commands::Revoke { jti } => {
            ctx.credentials
                .revoke(&jti)
                .await
                .with_context(|| format!("failed to revoke token {jti}"))?;
            println!("Revoked {jti}");
        }

        Commands::IssueToken {
            username,
            purpose,
            ttl_secs,
        } => {
            let validator = ctx.validator()?;
            let user = ctx
                .credentials
                .ensure_user(&username)
                .await
                .with_context(|| format!("failed to load user {username}"))?;
            let issued = validator
                .issue(user.id, purpose.into(), chrono::Duration::seconds(ttl_secs))
                .context("failed to sign token")?;

            let out = serde_json::json!({
                "user_id": user.id,
                "token": issued.token,
                "jti": issued.jti,
                "expires_at": issued.expires_at.to_rfc3339(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    ctx.db_pool.close().await;
    Ok(())
}

async fn serve(ctx: &AppContext, host: &str, port: u16) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = AppState::build(ctx, shutdown.clone())?;

    let purge = maintenance::spawn_window_purge(
        SqliteWindowStore::new(ctx.db_pool.clone()),
        state.services.limiter.clone(),
        state.services.settings.rate_limit_window,
        shutdown.clone(),
    );

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Banter listening");

    let sessions = state.sessions.clone();
    let router = http::router::build_router(state);

    let signal_token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested, closing sessions");
            signal_token.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    maintenance::drain_sessions(&sessions, SESSION_DRAIN_GRACE).await;
    if let Err(err) = purge.await {
        tracing::warn!(error = %err, "Purge task ended abnormally");
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
