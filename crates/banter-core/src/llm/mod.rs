//! LLM provider abstraction and the AI streaming client.

pub mod box_provider;
pub mod client;
pub mod encoding;
pub mod provider;
pub mod retry;
pub mod token_budget;
