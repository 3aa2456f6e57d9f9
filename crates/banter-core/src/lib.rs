//! Business logic and collaborator trait definitions for Banter.
//!
//! This crate defines the "ports" (store, credential, provider and window
//! store traits) that the infrastructure layer implements, plus the
//! per-connection session engine that drives them. It depends only on
//! `banter-types` -- never on `banter-infra` or any database/IO crate.

pub mod auth;
pub mod chat;
pub mod llm;
pub mod ratelimit;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
