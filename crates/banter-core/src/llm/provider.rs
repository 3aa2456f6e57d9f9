//! ChatProvider trait definition.
//!
//! Uses RPITIT for both calls. Streaming is split into an establish step
//! (`connect_stream`, which resolves once the provider accepted the request)
//! and the returned event stream, so retries can wrap only the establish step.

use std::pin::Pin;

use futures_util::Stream;

use banter_types::llm::{CompletionRequest, CompletionResponse, LlmError, StreamEvent};

/// Boxed stream of provider events. `'static` so it can outlive the request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

/// Trait for completion provider backends.
///
/// Implementations live in banter-infra (e.g., `OpenAiCompatibleProvider`).
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;

    /// Open a streaming completion. Errors returned here happened before any
    /// event was produced; errors inside the stream happened mid-flight.
    fn connect_stream(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<EventStream, LlmError>> + Send;
}
