//! Observability setup for Banter: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
