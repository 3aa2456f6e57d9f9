//! Shared domain types for Banter.
//!
//! Conversations, messages, users, the WebSocket wire protocol, LLM
//! request/stream shapes, configuration sections and error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod user;
