use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;

use jiral_core::errors::GatewayError;
use jiral_core::messages::ChatMessage;
use jiral_core::provider::{ChatRequest, EventStream, LlmProvider};
use jiral_core::stream::StreamEvent;
use jiral_core::tools::ToolCallIntent;

/// Pre-programmed responses for deterministic testing without a backend.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Yield the events with a pause before each one.
    Paced(Duration, Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A text response delivered as one delta per chunk.
    pub fn stream_chunks(chunks: &[&str]) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: (*c).to_string(),
        }));
        events.push(StreamEvent::Done {
            message: ChatMessage::assistant(chunks.concat()),
            usage: None,
        });
        Self::Stream(events)
    }

    pub fn stream_text(text: &str) -> Self {
        Self::stream_chunks(&[text])
    }

    /// Optional leading text, then a single tool-call decision.
    pub fn tool_calls(preamble: &[&str], calls: Vec<ToolCallIntent>) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(preamble.iter().map(|c| StreamEvent::TextDelta {
            delta: (*c).to_string(),
        }));
        events.push(StreamEvent::ToolCalls {
            calls: calls.clone(),
        });
        let mut message = ChatMessage::assistant(preamble.concat());
        message.tool_calls = calls;
        events.push(StreamEvent::Done {
            message,
            usage: None,
        });
        Self::Stream(events)
    }

    /// Text chunks followed by a mid-stream error event.
    pub fn stream_error(chunks: &[&str], error: GatewayError) -> Self {
        let mut events = vec![StreamEvent::Start];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta {
            delta: (*c).to_string(),
        }));
        events.push(StreamEvent::Error { error });
        Self::Stream(events)
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let response = self.responses.lock().pop_front();
        let Some(response) = response else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Paced(pause, events) => {
                let paced = stream::iter(events).then(move |event| async move {
                    tokio::time::sleep(pause).await;
                    event
                });
                return Ok(Box::pin(paced));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
