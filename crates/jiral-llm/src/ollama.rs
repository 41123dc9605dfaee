use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use tracing::{debug, instrument};

use jiral_core::errors::GatewayError;
use jiral_core::provider::{ChatRequest, EventStream, LlmProvider};
use jiral_core::stream::StreamEvent;

use crate::converter::{self, NdjsonParser};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat backend for a local Ollama daemon (`POST /api/chat`, NDJSON).
pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, request), fields(model = %request.model, tools = request.tools.len()))]
    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, GatewayError> {
        let body = converter::build_request_body(request);

        let resp = self
            .client
            .post(self.chat_url())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            debug!(status, "chat request rejected");
            return Err(GatewayError::from_status(status, body));
        }

        Ok(Box::pin(NdjsonStream::new(resp.bytes_stream())))
    }
}

/// Wraps a byte stream from reqwest and yields StreamEvents, one response
/// line at a time. A body that ends before the `done` line yields a
/// `StreamInterrupted` error.
///
/// Generation can legitimately pause for a long time on large models, so
/// there is no idle timeout; dropping the stream aborts the request.
pub(crate) struct NdjsonStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: NdjsonParser,
    buffer: Vec<u8>,
    pending: std::collections::VecDeque<StreamEvent>,
    ended: bool,
}

impl NdjsonStream {
    pub(crate) fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: NdjsonParser::new(),
            buffer: Vec::new(),
            pending: std::collections::VecDeque::new(),
            ended: false,
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            self.pending.extend(self.parser.parse_line(&text));
        }
    }
}

impl Stream for NdjsonStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if self.ended || self.parser.is_finished() {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    // Split on raw bytes so multi-byte chars across chunk
                    // boundaries survive.
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.ended = true;
                    return Poll::Ready(Some(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    self.ended = true;
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        let text = String::from_utf8_lossy(&remaining);
                        let events = self.parser.parse_line(&text);
                        self.pending.extend(events);
                    }
                    if !self.parser.is_finished() {
                        self.pending.push_back(StreamEvent::Error {
                            error: GatewayError::StreamInterrupted(
                                "response ended before completion".into(),
                            ),
                        });
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use jiral_core::messages::ChatMessage;
    use jiral_core::provider::GenerationOptions;

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(bytes::Bytes::from(c))))
    }

    async fn collect(stream: NdjsonStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let stream = NdjsonStream::new(byte_stream(vec![
            "{\"message\":{\"content\":\"Hel",
            "lo\"},\"done\":false}\n{\"message\":{\"content\":\" world\"},\"done\":false}\n",
            "{\"done\":true}\n",
        ]));
        let events = collect(stream).await;
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello world");
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn multibyte_char_across_chunks() {
        // "é" is 0xC3 0xA9; split the two bytes over separate chunks.
        let first = b"{\"message\":{\"content\":\"caf\xC3".to_vec();
        let second = b"\xA9\"}}\n{\"done\":true}\n".to_vec();
        let stream = NdjsonStream::new(futures::stream::iter(vec![
            Ok(bytes::Bytes::from(first)),
            Ok(bytes::Bytes::from(second)),
        ]));
        let events = collect(stream).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::TextDelta { delta } if delta == "café")));
    }

    #[tokio::test]
    async fn trailing_line_without_newline_parsed() {
        let stream = NdjsonStream::new(byte_stream(vec![
            "{\"message\":{\"content\":\"x\"}}\n",
            "{\"done\":true}",
        ]));
        let events = collect(stream).await;
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn body_ending_early_is_interrupted() {
        let stream = NdjsonStream::new(byte_stream(vec!["{\"message\":{\"content\":\"par\"}}\n"]));
        let events = collect(stream).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { error: GatewayError::StreamInterrupted(_) })
        ));
    }

    #[tokio::test]
    async fn stream_ends_after_done() {
        let stream = NdjsonStream::new(byte_stream(vec![
            "{\"done\":true}\n{\"message\":{\"content\":\"ignored\"}}\n",
        ]));
        let events = collect(stream).await;
        assert_eq!(events.len(), 2); // Start, Done
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let provider = OllamaProvider::new("http://localhost:11434/").unwrap();
        assert_eq!(provider.base_url(), DEFAULT_BASE_URL);
        assert_eq!(provider.chat_url(), "http://localhost:11434/api/chat");
        assert_eq!(provider.name(), "ollama");
    }

    // ── against a local HTTP server ─────────────────────────────────

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "qwen3:14b".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            options: GenerationOptions {
                max_tokens: Some(512),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn streams_from_http_endpoint() {
        use axum::routing::post;
        use axum::Json;

        let router = axum::Router::new().route(
            "/api/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["model"], "qwen3:14b");
                assert_eq!(body["options"]["num_predict"], 512);
                "{\"message\":{\"role\":\"assistant\",\"content\":\"hey\"},\"done\":false}\n{\"done\":true}\n"
            }),
        );
        let base = serve(router).await;

        let provider = OllamaProvider::new(base).unwrap();
        let message = provider.complete(&request()).await.unwrap();
        assert_eq!(message.content, "hey");
    }

    #[tokio::test]
    async fn not_found_maps_to_model_not_found() {
        use axum::http::StatusCode;
        use axum::routing::post;

        let router = axum::Router::new().route(
            "/api/chat",
            post(|| async { (StatusCode::NOT_FOUND, "model \"qwen3:14b\" not found") }),
        );
        let base = serve(router).await;

        let provider = OllamaProvider::new(base).unwrap();
        let result = provider.stream(&request()).await;
        assert!(matches!(result, Err(GatewayError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = OllamaProvider::new(format!("http://{addr}")).unwrap();
        let result = provider.stream(&request()).await;
        assert!(matches!(result, Err(GatewayError::NetworkError(_))));
    }
}
