//! Connection settings for an OpenAI-compatible endpoint.

use secrecy::SecretString;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Human-readable provider name, used as `gen_ai.system`.
    pub provider_name: String,
    pub base_url: String,
    pub api_key: SecretString,
    /// Fallback model when a request leaves `model` empty.
    pub model: String,
}

impl OpenAiCompatConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider_name: "openai".into(),
            base_url: OPENAI_BASE_URL.into(),
            api_key: SecretString::from(api_key.to_string()),
            model: model.into(),
        }
    }

    /// Point at a self-hosted or proxy endpoint speaking the same protocol.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}
