//! Infrastructure layer for Banter.
//!
//! Implements the ports defined in `banter-core`: SQLite conversation,
//! credential and rate-limit stores, the JWT credential validator, and the
//! OpenAI-compatible completion provider. Also loads `banter.toml`.

pub mod auth;
pub mod config;
pub mod llm;
pub mod sqlite;
