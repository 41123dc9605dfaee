//! The per-query streaming state machine.
//!
//! ```text
//! Init ─▶ StreamingPrimary ─▶ Done
//!              │
//!              ▼
//!         ToolsDetected ─▶ InvokingTools ─▶ StreamingSecondary ─▶ Done
//! ```
//!
//! Any backend failure yields one `Err` item and ends the stream. The
//! machine is driven by the consumer: each poll advances it to the next
//! emitted chunk, so at most one upstream read (model or tool) is pending
//! at any time. Dropping the stream drops whatever is in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use jiral_core::ids::QueryId;
use jiral_core::messages::ChatMessage;
use jiral_core::provider::{ChatRequest, EventStream, FunctionTool, GenerationOptions, LlmProvider};
use jiral_core::stream::StreamEvent;
use jiral_core::tools::{ToolCallIntent, ToolResult};

use crate::error::EngineError;
use crate::invoker::ToolInvoker;
use crate::markers;

/// Model selection and options for the two passes.
#[derive(Clone, Debug)]
pub struct PassConfig {
    pub primary_model: String,
    pub primary_options: GenerationOptions,
    pub summary_model: String,
    pub summary_options: GenerationOptions,
}

/// Everything a query needs, shared with the owning session.
#[derive(Clone)]
pub(crate) struct QueryContext {
    pub provider: Arc<dyn LlmProvider>,
    pub invoker: Arc<ToolInvoker>,
    pub tools: Arc<Vec<FunctionTool>>,
    pub passes: Arc<PassConfig>,
    pub debug: bool,
}

enum Phase {
    /// Waiting for the session gate, then opening the primary stream.
    Init(String),
    StreamingPrimary(EventStream),
    ToolsDetected(Vec<ToolCallIntent>),
    InvokingTools {
        queue: VecDeque<ToolCallIntent>,
        in_flight: Option<ToolCallIntent>,
        results: Vec<ToolResult>,
    },
    StreamingSecondary(EventStream),
    Done,
}

impl Phase {
    fn label(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::StreamingPrimary(_) => "streaming_primary",
            Self::ToolsDetected(_) => "tools_detected",
            Self::InvokingTools { .. } => "invoking_tools",
            Self::StreamingSecondary(_) => "streaming_secondary",
            Self::Done => "done",
        }
    }
}

/// Logs elapsed time when the query ends, however it ends.
struct QueryTimer {
    id: QueryId,
    started: Instant,
    debug: bool,
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if self.debug {
            info!(query_id = %self.id, elapsed_ms, "total processing time");
        } else {
            debug!(query_id = %self.id, elapsed_ms, "query finished");
        }
    }
}

struct QueryState {
    ctx: QueryContext,
    phase: Phase,
    gate: Arc<tokio::sync::Mutex<()>>,
    _permit: Option<OwnedMutexGuard<()>>,
    timer: QueryTimer,
}

/// Build the lazy output stream for one query. Nothing happens until the
/// first poll; the query gate is taken then and held until the stream is
/// exhausted or dropped.
pub(crate) fn run_query(
    ctx: QueryContext,
    gate: Arc<tokio::sync::Mutex<()>>,
    query: String,
) -> impl Stream<Item = Result<String, EngineError>> + Send + 'static {
    let timer = QueryTimer {
        id: QueryId::new(),
        started: Instant::now(),
        debug: ctx.debug,
    };
    let state = QueryState {
        ctx,
        phase: Phase::Init(query),
        gate,
        _permit: None,
        timer,
    };

    futures::stream::unfold(state, |mut state| async move {
        let item = state.advance().await?;
        Some((item, state))
    })
}

impl QueryState {
    /// Run the machine until it has a chunk to emit. `None` once finished.
    async fn advance(&mut self) -> Option<Result<String, EngineError>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Init(query) => {
                    self._permit = Some(self.gate.clone().lock_owned().await);
                    debug!(query_id = %self.timer.id, "query started");

                    let request = ChatRequest {
                        model: self.ctx.passes.primary_model.clone(),
                        messages: vec![ChatMessage::user(query)],
                        tools: self.ctx.tools.as_ref().clone(),
                        options: self.ctx.passes.primary_options.clone(),
                    };
                    match self.ctx.provider.stream(&request).await {
                        Ok(stream) => self.phase = Phase::StreamingPrimary(stream),
                        Err(e) => return Some(Err(self.fail(e.into()))),
                    }
                }

                Phase::StreamingPrimary(mut stream) => match stream.next().await {
                    Some(StreamEvent::TextDelta { delta }) => {
                        self.phase = Phase::StreamingPrimary(stream);
                        if !delta.is_empty() {
                            return Some(Ok(delta));
                        }
                    }
                    Some(StreamEvent::ToolCalls { calls }) if !calls.is_empty() => {
                        // First decision wins; the rest of the primary
                        // response is never read.
                        debug!(count = calls.len(), "tool calls detected");
                        drop(stream);
                        self.phase = Phase::ToolsDetected(calls);
                    }
                    Some(StreamEvent::Done { message, .. }) if message.has_tool_calls() => {
                        self.phase = Phase::ToolsDetected(message.tool_calls);
                    }
                    Some(StreamEvent::Error { error }) => return Some(Err(self.fail(error.into()))),
                    Some(StreamEvent::Done { .. }) | None => return None,
                    Some(StreamEvent::Start) | Some(StreamEvent::ToolCalls { .. }) => {
                        self.phase = Phase::StreamingPrimary(stream);
                    }
                },

                Phase::ToolsDetected(calls) => {
                    self.phase = Phase::InvokingTools {
                        queue: calls.into(),
                        in_flight: None,
                        results: Vec::new(),
                    };
                    return Some(Ok(markers::PROCESSING.to_string()));
                }

                Phase::InvokingTools {
                    mut queue,
                    in_flight,
                    mut results,
                } => match in_flight {
                    Some(call) => {
                        let result = self.ctx.invoker.invoke(&call).await;
                        let marker = markers::tool_end(&result);
                        results.push(result);
                        self.phase = Phase::InvokingTools {
                            queue,
                            in_flight: None,
                            results,
                        };
                        return Some(Ok(marker));
                    }
                    None => match queue.pop_front() {
                        Some(call) => {
                            let marker = markers::tool_start(&call.name);
                            self.phase = Phase::InvokingTools {
                                queue,
                                in_flight: Some(call),
                                results,
                            };
                            return Some(Ok(marker));
                        }
                        None => {
                            let request = ChatRequest {
                                model: self.ctx.passes.summary_model.clone(),
                                messages: vec![ChatMessage::system(markers::summary_prompt(&results))],
                                tools: Vec::new(),
                                options: self.ctx.passes.summary_options.clone(),
                            };
                            match self.ctx.provider.stream(&request).await {
                                Ok(stream) => self.phase = Phase::StreamingSecondary(stream),
                                Err(e) => return Some(Err(self.fail(e.into()))),
                            }
                        }
                    },
                },

                Phase::StreamingSecondary(mut stream) => match stream.next().await {
                    Some(StreamEvent::TextDelta { delta }) => {
                        self.phase = Phase::StreamingSecondary(stream);
                        if !delta.is_empty() {
                            return Some(Ok(delta));
                        }
                    }
                    Some(StreamEvent::Error { error }) => return Some(Err(self.fail(error.into()))),
                    Some(StreamEvent::Done { .. }) | None => return None,
                    Some(StreamEvent::ToolCalls { calls }) => {
                        warn!(count = calls.len(), "ignoring tool calls in summarization pass");
                        self.phase = Phase::StreamingSecondary(stream);
                    }
                    Some(StreamEvent::Start) => self.phase = Phase::StreamingSecondary(stream),
                },

                Phase::Done => return None,
            }
        }
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        warn!(query_id = %self.timer.id, phase = self.phase.label(), error = %error, "query failed");
        self.phase = Phase::Done;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;
    use jiral_core::errors::GatewayError;
    use jiral_core::tools::{ChannelError, ToolChannel};
    use jiral_llm::{MockProvider, MockResponse};
    use jiral_mcp::{MockOutcome, MockToolChannel};
    use serde_json::{json, Value};

    fn passes() -> PassConfig {
        PassConfig {
            primary_model: "qwen3:14b".into(),
            primary_options: GenerationOptions {
                max_tokens: Some(512),
                temperature: Some(0.7),
                context_window: Some(2048),
            },
            summary_model: "gemma3:27b".into(),
            summary_options: GenerationOptions::default(),
        }
    }

    async fn context(provider: Arc<MockProvider>, channel: Arc<MockToolChannel>) -> QueryContext {
        let registry = Arc::new(ToolRegistry::new(channel.list_tools().await.unwrap()));
        QueryContext {
            provider,
            invoker: Arc::new(ToolInvoker::new(channel, registry.clone(), true, 64 * 1024)),
            tools: Arc::new(registry.function_tools().to_vec()),
            passes: Arc::new(passes()),
            debug: false,
        }
    }

    fn jira_channel(get_issue: MockOutcome) -> MockToolChannel {
        MockToolChannel::new()
            .with_tool(
                "get_issue",
                json!({"type": "object", "properties": {"issueKey": {"type": "string"}}, "required": ["issueKey"]}),
                get_issue,
            )
            .with_open_tool("add_comment", MockOutcome::Text("Comment added to issue PROJ-1 successfully".into()))
    }

    fn intent(name: &str, args: Value) -> ToolCallIntent {
        ToolCallIntent::new(name, args.as_object().cloned().unwrap_or_default())
    }

    async fn collect(
        provider: Arc<MockProvider>,
        channel: Arc<MockToolChannel>,
        query: &str,
    ) -> Vec<Result<String, EngineError>> {
        let ctx = context(provider, channel).await;
        run_query(ctx, Arc::new(tokio::sync::Mutex::new(())), query.to_string())
            .collect()
            .await
    }

    fn texts(items: &[Result<String, EngineError>]) -> Vec<String> {
        items.iter().filter_map(|i| i.as_ref().ok().cloned()).collect()
    }

    #[tokio::test]
    async fn no_tool_call_forwards_content_unchanged() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_chunks(&["2", " + 2", " = 4"])]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));

        let items = collect(provider.clone(), channel.clone(), "What's 2+2?").await;

        assert_eq!(texts(&items), vec!["2", " + 2", " = 4"]);
        assert_eq!(provider.call_count(), 1);
        assert!(channel.called().is_empty());
    }

    #[tokio::test]
    async fn primary_request_carries_tools_and_options() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("hi")]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));
        let _ = collect(provider.clone(), channel, "hello").await;

        let request = &provider.requests()[0];
        assert_eq!(request.model, "qwen3:14b");
        assert_eq!(request.tools.len(), 2);
        assert_eq!(request.options.max_tokens, Some(512));
        assert_eq!(request.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn single_tool_success() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(&["Let me check. "], vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))]),
            MockResponse::stream_chunks(&["PROJ-1 is ", "in progress."]),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{\"key\":\"PROJ-1\",\"status\":\"In Progress\"}".into())));

        let items = collect(provider.clone(), channel.clone(), "Status of PROJ-1?").await;

        assert_eq!(
            texts(&items),
            vec![
                "Let me check. ".to_string(),
                markers::PROCESSING.to_string(),
                markers::tool_start("get_issue"),
                markers::tool_success("get_issue"),
                "PROJ-1 is ".to_string(),
                "in progress.".to_string(),
            ]
        );
        assert_eq!(channel.called(), vec!["get_issue"]);
    }

    #[tokio::test]
    async fn summary_pass_uses_summary_model_without_tools() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(&[], vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))]),
            MockResponse::stream_text("summary"),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{\"key\":\"PROJ-1\"}".into())));
        let _ = collect(provider.clone(), channel, "q").await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let summary = &requests[1];
        assert_eq!(summary.model, "gemma3:27b");
        assert!(summary.tools.is_empty());
        assert_eq!(summary.options, GenerationOptions::default());
        assert_eq!(summary.messages.len(), 1);
        assert_eq!(
            summary.messages[0].content,
            "Tool results:\nget_issue: {\"key\":\"PROJ-1\"}\n\nSummarize these findings clearly and concisely."
        );
    }

    #[tokio::test]
    async fn tool_failure_still_summarizes() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(&[], vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))]),
            MockResponse::stream_text("The lookup failed because the connection was refused."),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Fail(ChannelError::Transport(
            "connection refused".into(),
        ))));

        let items = collect(provider.clone(), channel, "Status of PROJ-1?").await;

        assert!(items.iter().all(|i| i.is_ok()));
        let out = texts(&items);
        assert_eq!(out[1], markers::tool_start("get_issue"));
        assert_eq!(
            out[2],
            markers::tool_failure("get_issue", "transport error: connection refused")
        );
        assert_eq!(out.last().map(String::as_str), Some("The lookup failed because the connection was refused."));

        let prompt = &provider.requests()[1].messages[0].content;
        assert!(prompt.contains("get_issue failed: transport error: connection refused"));
    }

    #[tokio::test]
    async fn batch_runs_in_issuance_order() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(
                &[],
                vec![
                    intent("add_comment", json!({"issueKey": "PROJ-1", "comment": "looking"})),
                    intent("get_issue", json!({"issueKey": "PROJ-1"})),
                ],
            ),
            MockResponse::stream_text("done"),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));

        let items = collect(provider, channel.clone(), "q").await;

        assert_eq!(
            texts(&items),
            vec![
                markers::PROCESSING.to_string(),
                markers::tool_start("add_comment"),
                markers::tool_success("add_comment"),
                markers::tool_start("get_issue"),
                markers::tool_success("get_issue"),
                "done".to_string(),
            ]
        );
        assert_eq!(channel.called(), vec!["add_comment", "get_issue"]);
    }

    #[tokio::test]
    async fn failed_call_does_not_stop_the_batch() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(
                &[],
                vec![
                    intent("add_comment", json!({"issueKey": "PROJ-1", "comment": "looking"})),
                    intent("get_issue", json!({"issueKey": "PROJ-1"})),
                ],
            ),
            MockResponse::stream_text("Could not comment, but PROJ-1 is open."),
        ]));
        let channel = Arc::new(
            MockToolChannel::new()
                .with_open_tool(
                    "add_comment",
                    MockOutcome::Fail(ChannelError::Transport("connection reset".into())),
                )
                .with_open_tool("get_issue", MockOutcome::Text("{\"key\":\"PROJ-1\"}".into())),
        );

        let items = collect(provider.clone(), channel.clone(), "Comment on PROJ-1").await;

        assert!(items.iter().all(|i| i.is_ok()));
        assert_eq!(
            texts(&items),
            vec![
                markers::PROCESSING.to_string(),
                markers::tool_start("add_comment"),
                markers::tool_failure("add_comment", "transport error: connection reset"),
                markers::tool_start("get_issue"),
                markers::tool_success("get_issue"),
                "Could not comment, but PROJ-1 is open.".to_string(),
            ]
        );
        assert_eq!(channel.called(), vec!["add_comment", "get_issue"]);

        let prompt = &provider.requests()[1].messages[0].content;
        let failed = prompt.find("add_comment failed: transport error: connection reset").unwrap();
        let succeeded = prompt.find("get_issue: {\"key\":\"PROJ-1\"}").unwrap();
        assert!(failed < succeeded);
    }

    #[tokio::test]
    async fn content_after_decision_is_not_read() {
        let calls = vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))];
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::Stream(vec![
                StreamEvent::Start,
                StreamEvent::TextDelta { delta: "before".into() },
                StreamEvent::ToolCalls { calls },
                StreamEvent::TextDelta { delta: "after".into() },
                StreamEvent::Done { message: ChatMessage::assistant("beforeafter"), usage: None },
            ]),
            MockResponse::stream_text("summary"),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));

        let out = texts(&collect(provider, channel, "q").await);
        assert_eq!(out[0], "before");
        assert!(!out.iter().any(|c| c == "after"));
    }

    #[tokio::test]
    async fn summary_pass_ignores_tool_calls() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(&[], vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))]),
            MockResponse::tool_calls(&["text"], vec![intent("get_issue", json!({"issueKey": "PROJ-2"}))]),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));

        let out = texts(&collect(provider.clone(), channel.clone(), "q").await);
        assert_eq!(out.last().map(String::as_str), Some("text"));
        assert_eq!(channel.called(), vec!["get_issue"]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn empty_chunks_skipped() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_chunks(&["", "a", "", "b"])]));
        let channel = Arc::new(MockToolChannel::new());
        assert_eq!(texts(&collect(provider, channel, "q").await), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn primary_connect_failure_is_stream_error() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(GatewayError::NetworkError(
            "connection refused".into(),
        ))]));
        let channel = Arc::new(MockToolChannel::new());

        let items = collect(provider, channel, "q").await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(EngineError::Gateway(GatewayError::NetworkError(_)))));
    }

    #[tokio::test]
    async fn mid_stream_failure_follows_delivered_content() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_error(
            &["partial "],
            GatewayError::StreamInterrupted("connection reset".into()),
        )]));
        let channel = Arc::new(MockToolChannel::new());

        let items = collect(provider, channel, "q").await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().ok().map(String::as_str), Some("partial "));
        assert!(matches!(&items[1], Err(EngineError::Gateway(GatewayError::StreamInterrupted(_)))));
    }

    #[tokio::test]
    async fn summary_failure_propagates() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(&[], vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))]),
            MockResponse::Error(GatewayError::ModelNotFound("gemma3:27b".into())),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));

        let items = collect(provider, channel, "q").await;
        assert!(matches!(items.last(), Some(Err(EngineError::Gateway(GatewayError::ModelNotFound(_))))));
        assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn tool_calls_only_in_done_message() {
        let mut message = ChatMessage::assistant("");
        message.tool_calls = vec![intent("get_issue", json!({"issueKey": "PROJ-1"}))];
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::Stream(vec![StreamEvent::Start, StreamEvent::Done { message, usage: None }]),
            MockResponse::stream_text("ok"),
        ]));
        let channel = Arc::new(jira_channel(MockOutcome::Text("{}".into())));

        let out = texts(&collect(provider, channel.clone(), "q").await);
        assert_eq!(out[0], markers::PROCESSING);
        assert_eq!(channel.called(), vec!["get_issue"]);
    }

    #[tokio::test]
    async fn dropping_stream_releases_gate() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_chunks(&["a", "b", "c"])]));
        let channel = Arc::new(MockToolChannel::new());
        let ctx = context(provider, channel).await;
        let gate = Arc::new(tokio::sync::Mutex::new(()));

        let mut stream = Box::pin(run_query(ctx, gate.clone(), "q".into()));
        assert_eq!(stream.next().await.and_then(Result::ok).as_deref(), Some("a"));
        assert!(gate.try_lock().is_err());

        drop(stream);
        assert!(gate.try_lock().is_ok());
    }
}
