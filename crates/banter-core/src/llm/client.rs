//! AI streaming client.
//!
//! `AiClient` turns a [`BoxChatProvider`] into the uniform contract the
//! session engine consumes: a lazy sequence of content deltas and usage
//! reports, or a single non-streaming completion. Establishing a call is
//! retried per [`RetryPolicy`]; once a stream has started, failures are
//! surfaced as [`AiServiceError`] and never retried here.
//!
//! Built once at startup and shared by every connection behind an `Arc`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tracing::{Instrument, Span, debug, field, info_span, warn};

use banter_types::llm::{
    AiServiceError, CompletionRequest, CompletionResponse, PromptMessage, StreamEvent,
};

use super::box_provider::BoxChatProvider;
use super::retry::RetryPolicy;

/// Stream of events as seen by callers of [`AiClient::stream`].
pub type AiEventStream<'a> =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, AiServiceError>> + Send + 'a>>;

pub struct AiClient {
    provider: BoxChatProvider,
    retry: RetryPolicy,
}

impl AiClient {
    pub fn new(provider: BoxChatProvider, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Stream a completion for `prompt`.
    ///
    /// Nothing is sent until the returned stream is first polled.
    pub fn stream(
        &self,
        prompt: Vec<PromptMessage>,
        model: &str,
        temperature: f64,
    ) -> AiEventStream<'_> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: prompt,
            max_tokens: None,
            temperature: Some(temperature),
            stream: true,
        };

        let span = info_span!(
            "gen_ai.stream",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.temperature = temperature,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );

        let provider = &self.provider;
        let retry = &self.retry;
        let record_span = span.clone();

        let inner: AiEventStream<'_> = Box::pin(async_stream::try_stream! {
            let mut events = retry
                .run("stream", || provider.connect_stream(&request))
                .await
                .map_err(AiServiceError::from)?;

            while let Some(event) = events.next().await {
                match event {
                    Ok(StreamEvent::Usage(usage)) => {
                        record_span.record("gen_ai.usage.input_tokens", usage.input_tokens);
                        record_span.record("gen_ai.usage.output_tokens", usage.output_tokens);
                        yield StreamEvent::Usage(usage);
                    }
                    Ok(event) => yield event,
                    Err(err) => {
                        warn!(error = %err, "Provider stream failed mid-flight");
                        Err(AiServiceError::from(err))?;
                    }
                }
            }
            debug!("Provider stream finished");
        });

        Box::pin(StreamInSpan { inner, span })
    }

    /// Request a single non-streaming completion.
    pub async fn complete(
        &self,
        prompt: Vec<PromptMessage>,
        model: &str,
        temperature: f64,
        max_output: u32,
    ) -> Result<CompletionResponse, AiServiceError> {
        let request = CompletionRequest {
            model: model.to_string(),
            messages: prompt,
            max_tokens: Some(max_output),
            temperature: Some(temperature),
            stream: false,
        };

        let span = info_span!(
            "gen_ai.complete",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.temperature = temperature,
            gen_ai.request.max_tokens = max_output,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );

        let response = self
            .retry
            .run("complete", || self.provider.complete(&request))
            .instrument(span.clone())
            .await?;

        span.record("gen_ai.usage.input_tokens", response.usage.input_tokens);
        span.record("gen_ai.usage.output_tokens", response.usage.output_tokens);
        Ok(response)
    }
}

pin_project_lite::pin_project! {
    /// Polls the inner stream with `span` entered.
    struct StreamInSpan<S> {
        #[pin]
        inner: S,
        span: Span,
    }
}

impl<S: Stream> Stream for StreamInSpan<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _enter = this.span.enter();
        this.inner.poll_next(cx)
    }
}
