//! Conversation persistence contract and the per-exchange building blocks:
//! content validation, bounded history reconstruction, and summarization.

pub mod content;
pub mod history;
pub mod repository;
pub mod summarizer;
