//! HTTP surface: the chat WebSocket endpoint and a health check.

pub mod handlers;
pub mod router;
