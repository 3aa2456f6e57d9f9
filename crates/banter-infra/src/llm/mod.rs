//! Completion provider implementations.
//!
//! [`create_provider`] builds the configured provider as a
//! [`BoxChatProvider`] so the AI client never sees the concrete type.

pub mod openai_compat;

use banter_core::llm::box_provider::BoxChatProvider;
use banter_types::config::AiConfig;
use banter_types::llm::LlmError;

use self::openai_compat::OpenAiCompatibleProvider;
use self::openai_compat::config::OpenAiCompatConfig;

/// Create a [`BoxChatProvider`] from the `[ai]` configuration section.
///
/// # Errors
///
/// Returns [`LlmError::AuthenticationFailed`] when no API key is configured.
pub fn create_provider(config: &AiConfig) -> Result<BoxChatProvider, LlmError> {
    let key = config
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or(LlmError::AuthenticationFailed)?;

    let mut oai_config = OpenAiCompatConfig::openai(key, &config.default_model);
    if let Some(base_url) = config.base_url.as_deref() {
        oai_config = oai_config.with_base_url(base_url);
    }

    tracing::info!(
        provider = %oai_config.provider_name,
        base_url = %oai_config.base_url,
        model = %oai_config.model,
        "Completion provider configured"
    );
    Ok(BoxChatProvider::new(OpenAiCompatibleProvider::new(oai_config)))
}
