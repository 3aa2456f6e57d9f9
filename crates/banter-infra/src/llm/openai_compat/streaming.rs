//! SSE chunk stream to [`StreamEvent`] adapter.
//!
//! Each content fragment becomes a `TextDelta`; the trailing usage chunk
//! (sent because the request sets `stream_options.include_usage`) becomes a
//! single `Usage` event. Empty fragments and role-only deltas are dropped.

use async_openai::error::OpenAIError;
use async_openai::types::chat::CreateChatCompletionStreamResponse;
use futures_util::{Stream, StreamExt};

use banter_core::llm::provider::EventStream;
use banter_types::llm::{StreamEvent, Usage};

use super::map_openai_error;

pub fn map_openai_stream<S>(stream: S) -> EventStream
where
    S: Stream<Item = Result<CreateChatCompletionStreamResponse, OpenAIError>> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut stream = Box::pin(stream);

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(map_openai_error)?;

            for choice in &chunk.choices {
                if let Some(text) = choice.delta.content.as_ref() {
                    if !text.is_empty() {
                        yield StreamEvent::TextDelta { text: text.clone() };
                    }
                }
            }

            if let Some(usage) = chunk.usage.as_ref() {
                yield StreamEvent::Usage(Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_types::llm::LlmError;

    fn chunk(json: &str) -> Result<CreateChatCompletionStreamResponse, OpenAIError> {
        Ok(serde_json::from_str(json).unwrap())
    }

    fn content(text: &str) -> Result<CreateChatCompletionStreamResponse, OpenAIError> {
        chunk(&format!(
            r#"{{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o",
                "choices":[{{"index":0,"delta":{{"content":{}}},"finish_reason":null}}]}}"#,
            serde_json::to_string(text).unwrap()
        ))
    }

    fn usage(prompt: u32, completion: u32) -> Result<CreateChatCompletionStreamResponse, OpenAIError> {
        chunk(&format!(
            r#"{{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o",
                "choices":[],
                "usage":{{"prompt_tokens":{prompt},"completion_tokens":{completion},"total_tokens":{}}}}}"#,
            prompt + completion
        ))
    }

    #[tokio::test]
    async fn test_maps_deltas_then_usage() {
        let role_only = chunk(
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o",
                "choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#,
        );
        let source = futures_util::stream::iter(vec![
            role_only,
            content("Hel"),
            content(""),
            content("lo"),
            usage(12, 2),
        ]);

        let events: Vec<StreamEvent> = map_openai_stream(source)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta { text: "Hel".into() },
                StreamEvent::TextDelta { text: "lo".into() },
                StreamEvent::Usage(Usage {
                    input_tokens: 12,
                    output_tokens: 2,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let source = futures_util::stream::iter(vec![
            content("partial"),
            Err(OpenAIError::InvalidArgument("broken chunk".into())),
            content("never"),
        ]);

        let mut events = map_openai_stream(source);
        assert!(matches!(
            events.next().await,
            Some(Ok(StreamEvent::TextDelta { .. }))
        ));
        assert!(matches!(
            events.next().await,
            Some(Err(LlmError::InvalidRequest(_)))
        ));
        assert!(events.next().await.is_none());
    }
}
