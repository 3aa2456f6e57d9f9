//! Configuration loader for Banter.
//!
//! Reads `banter.toml` and deserializes it into [`BanterConfig`]. Falls back
//! to defaults when the file is missing or malformed, then applies
//! environment overrides for secrets.

use std::path::Path;

use banter_types::config::BanterConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "BANTER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "banter.toml";

const JWT_SECRET_ENV: &str = "BANTER_JWT_SECRET";
const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DATABASE_URL_ENV: &str = "BANTER_DATABASE_URL";

/// Load configuration from `path`, then apply environment overrides.
///
/// - A missing file yields [`BanterConfig::default()`].
/// - A file that fails to parse logs a warning and yields the default.
pub async fn load_config(path: &Path) -> BanterConfig {
    let config = read_config_file(path).await;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

async fn read_config_file(path: &Path) -> BanterConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return BanterConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return BanterConfig::default();
        }
    };

    match toml::from_str::<BanterConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            BanterConfig::default()
        }
    }
}

/// Fill secrets and the database URL from the environment.
///
/// Environment values win over the file; empty values are ignored.
pub fn apply_env_overrides(
    mut config: BanterConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> BanterConfig {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(secret) = get(JWT_SECRET_ENV) {
        config.auth.jwt_secret = Some(secret);
    }
    if let Some(key) = get(OPENAI_API_KEY_ENV) {
        config.ai.api_key = Some(key);
    }
    if let Some(url) = get(DATABASE_URL_ENV) {
        config.database.url = url;
    }
    config
}
