//! OpenAI-compatible `ChatProvider` implementation.
//!
//! Speaks the `chat/completions` streaming wire format used by OpenAI and
//! every OpenAI-compatible self-hosted backend (vLLM, Ollama, ...).
//! Grounded on `util::sse_proxy_stream`'s request construction (bearer
//! auth, `Accept: text/event-stream`) but decodes the SSE frames into
//! [`CompletionDelta`]s itself instead of passing the byte stream straight
//! through, since the orchestrator needs text deltas, not framed bytes.

use crate::provider::{ChatProvider, CompletionDelta, CompletionRequest, DeltaStream, ProviderError};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

/// Calls an OpenAI-compatible `/chat/completions` endpoint and decodes its
/// `text/event-stream` response into [`CompletionDelta`]s.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChatProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let messages: Vec<ChatMessage> = request
            .turns
            .iter()
            .map(|t| ChatMessage {
                role: t.role.as_str(),
                content: t.content.as_str(),
            })
            .collect();
        let body = ChatCompletionRequestBody {
            model: &request.model,
            messages,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(&url)
            .header(http::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!("upstream returned {status}: {text}")));
        }

        let byte_stream = response.bytes_stream().boxed();
        let state = SseDecodeState {
            inner: byte_stream,
            buffer: String::new(),
            finished: false,
        };

        Ok(stream::unfold(state, decode_next).boxed())
    }
}

struct SseDecodeState {
    inner: futures_util::stream::BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
    buffer: String,
    finished: bool,
}

async fn decode_next(mut state: SseDecodeState) -> Option<(Result<CompletionDelta, ProviderError>, SseDecodeState)> {
    loop {
        if state.finished {
            return None;
        }

        if let Some(idx) = state.buffer.find("\n\n") {
            let event: String = state.buffer.drain(..idx + 2).collect();
            match extract_data_line(&event) {
                Some(data) if data == "[DONE]" => {
                    state.finished = true;
                    return Some((
                        Ok(CompletionDelta {
                            text: String::new(),
                            finished: true,
                        }),
                        state,
                    ));
                }
                Some(data) => match parse_delta_text(&data) {
                    Some(text) => {
                        return Some((
                            Ok(CompletionDelta {
                                text,
                                finished: false,
                            }),
                            state,
                        ))
                    }
                    None => continue,
                },
                None => continue,
            }
        }

        match state.inner.next().await {
            Some(Ok(chunk)) => {
                state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                continue;
            }
            Some(Err(e)) => {
                state.finished = true;
                return Some((Err(ProviderError::Request(e.to_string())), state));
            }
            None => {
                state.finished = true;
                return None;
            }
        }
    }
}

fn extract_data_line(event: &str) -> Option<String> {
    for line in event.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            return Some(data.trim().to_string());
        }
    }
    None
}

fn parse_delta_text(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_data_payload_from_one_sse_event() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n";
        assert_eq!(
            extract_data_line(event).as_deref(),
            Some("{\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}")
        );
    }

    #[test]
    fn parses_delta_content_from_chat_completion_chunk() {
        let data = r#"{"choices":[{"delta":{"content":"hello"}}]}"#;
        assert_eq!(parse_delta_text(data).as_deref(), Some("hello"));
    }

    #[test]
    fn role_only_delta_has_no_content() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta_text(data), None);
    }

    #[tokio::test]
    async fn decode_next_recognises_done_sentinel() {
        let state = SseDecodeState {
            inner: stream::empty().boxed(),
            buffer: "data: [DONE]\n\n".to_string(),
            finished: false,
        };
        let (result, state) = decode_next(state).await.unwrap();
        let delta = result.unwrap();
        assert!(delta.finished);
        assert!(state.finished);
    }
}
