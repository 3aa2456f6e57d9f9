//! CLI definitions for the `banter` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use banter_infra::config::DEFAULT_CONFIG_PATH;
use banter_types::config::LogFormat;
use banter_types::user::TokenPurpose;

/// Real-time AI chat sessions over WebSocket.
#[derive(Parser)]
#[command(name = "banter", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, env = "BANTER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log output format (overrides `[logging] format`).
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the WebSocket chat server.
    Serve {
        /// Bind address (overrides `[server] host`).
        #[arg(long, env = "BANTER_HOST")]
        host: Option<String>,

        /// Port (overrides `[server] port`).
        #[arg(long, env = "BANTER_PORT")]
        port: Option<u16>,
    },

    /// Create or upgrade the database schema and exit.
    Migrate,

    /// Add a token id to the revocation list.
    Revoke {
        /// The token's `jti` claim.
        jti: String,
    },

    /// Mint a token for local testing, creating the user if needed.
    #[command(name = "issue-token")]
    IssueToken {
        username: String,

        #[arg(long, value_enum, default_value_t = PurposeArg::Access)]
        purpose: PurposeArg,

        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PurposeArg {
    Access,
    Refresh,
}

impl From<PurposeArg> for TokenPurpose {
    fn from(arg: PurposeArg) -> Self {
        match arg {
            PurposeArg::Access => TokenPurpose::Access,
            PurposeArg::Refresh => TokenPurpose::Refresh,
        }
    }
}
