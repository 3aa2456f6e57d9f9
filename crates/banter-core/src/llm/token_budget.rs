//! Token budgeting for conversation history.
//!
//! Counts prompt cost the way chat-completion APIs bill it and decides when
//! a conversation has grown enough to warrant summarization.
//!
//! Cost accounting:
//! - every message: 4 framing tokens + the encoded length of each non-empty
//!   field (role, content, name), +1 when a name is present
//! - every prompt: +3 closing tokens

use std::sync::Arc;

use banter_types::llm::PromptMessage;

use super::encoding::{Encoding, HeuristicEncoder, TextEncoder};

pub const TOKENS_PER_MESSAGE: usize = 4;
pub const TOKENS_PER_NAME: usize = 1;
pub const TOKENS_PER_REPLY: usize = 3;

/// Ceiling for models missing from [`MODEL_CEILINGS`].
pub const DEFAULT_CEILING: usize = 16_000;

/// History ceilings, deliberately below each model's context window.
pub const MODEL_CEILINGS: &[(&str, usize)] = &[
    ("gpt-4o", 32_000),
    ("gpt-4o-mini", 32_000),
    ("gpt-4-turbo", 32_000),
    ("gpt-3.5-turbo", 12_000),
];

/// Fraction of the ceiling past which summarization kicks in.
pub const SUMMARIZE_THRESHOLD: f64 = 0.7;

#[derive(Clone)]
pub struct TokenBudgeter {
    encoder: Arc<dyn TextEncoder>,
}

impl Default for TokenBudgeter {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicEncoder))
    }
}

impl TokenBudgeter {
    pub fn new(encoder: Arc<dyn TextEncoder>) -> Self {
        Self { encoder }
    }

    pub fn ceiling(&self, model: &str) -> usize {
        MODEL_CEILINGS
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, ceiling)| *ceiling)
            .unwrap_or(DEFAULT_CEILING)
    }

    pub fn threshold_fraction(&self) -> f64 {
        SUMMARIZE_THRESHOLD
    }

    /// Token count above which [`should_summarize`](Self::should_summarize) fires.
    pub fn summarize_threshold(&self, model: &str) -> usize {
        (self.ceiling(model) as f64 * SUMMARIZE_THRESHOLD) as usize
    }

    /// Strictly greater than the threshold.
    pub fn should_summarize(&self, total_tokens: usize, model: &str) -> bool {
        total_tokens > self.summarize_threshold(model)
    }

    /// Cost of a single message, without the per-prompt closing overhead.
    pub fn count_message(&self, message: &PromptMessage, model: &str) -> usize {
        let encoding = Encoding::for_model(model);
        let mut tokens = TOKENS_PER_MESSAGE;

        tokens += self.encoder.encode_len(encoding, message.role.as_str());
        if !message.content.is_empty() {
            tokens += self.encoder.encode_len(encoding, &message.content);
        }
        if let Some(name) = message.name.as_deref().filter(|n| !n.is_empty()) {
            tokens += self.encoder.encode_len(encoding, name) + TOKENS_PER_NAME;
        }
        tokens
    }

    /// Cost of a whole prompt.
    pub fn count_tokens(&self, messages: &[PromptMessage], model: &str) -> usize {
        messages
            .iter()
            .map(|m| self.count_message(m, model))
            .sum::<usize>()
            + TOKENS_PER_REPLY
    }
}
