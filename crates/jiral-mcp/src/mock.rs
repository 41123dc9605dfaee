use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use jiral_core::tools::{ChannelError, ToolChannel, ToolDescriptor, ToolOutput};

/// Scripted result for one tool.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// A successful text result.
    Text(String),
    /// The server answered with an error result (`is_error`).
    ToolError(String),
    /// The call failed at the transport level.
    Fail(ChannelError),
    /// The call panics inside the channel.
    Panic(String),
}

/// In-memory tool channel with scripted outcomes, optional latency and a
/// log of every call it receives.
pub struct MockToolChannel {
    tools: Vec<ToolDescriptor>,
    outcomes: HashMap<String, MockOutcome>,
    latency: Option<Duration>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl MockToolChannel {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            outcomes: HashMap::new(),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Declare a tool with the given schema and outcome.
    pub fn with_tool(mut self, name: &str, input_schema: Value, outcome: MockOutcome) -> Self {
        self.tools.push(ToolDescriptor {
            name: name.to_string(),
            description: format!("mock {name}"),
            input_schema,
        });
        let _ = self.outcomes.insert(name.to_string(), outcome);
        self
    }

    /// Declare a tool that accepts any object.
    pub fn with_open_tool(self, name: &str, outcome: MockOutcome) -> Self {
        self.with_tool(name, json!({"type": "object"}), outcome)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Tool names in call order.
    pub fn called(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().clone()
    }
}

impl Default for MockToolChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolChannel for MockToolChannel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ChannelError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ChannelError> {
        self.calls.lock().push((name.to_string(), arguments));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.outcomes.get(name) {
            Some(MockOutcome::Text(text)) => Ok(ToolOutput {
                content: json!([{"type": "text", "text": text}]),
                is_error: false,
            }),
            Some(MockOutcome::ToolError(text)) => Ok(ToolOutput {
                content: json!([{"type": "text", "text": text}]),
                is_error: true,
            }),
            Some(MockOutcome::Fail(err)) => Err(err.clone()),
            Some(MockOutcome::Panic(msg)) => panic!("{msg}"),
            None => Err(ChannelError::Protocol(format!("unknown tool: {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes() {
        let channel = MockToolChannel::new()
            .with_open_tool("get_issue", MockOutcome::Text("{\"key\":\"PROJ-1\"}".into()))
            .with_open_tool("add_comment", MockOutcome::Fail(ChannelError::Closed));

        let ok = channel.call_tool("get_issue", Map::new()).await.unwrap();
        assert_eq!(ok.text(), "{\"key\":\"PROJ-1\"}");

        let err = channel.call_tool("add_comment", Map::new()).await;
        assert!(matches!(err, Err(ChannelError::Closed)));

        assert_eq!(channel.called(), vec!["get_issue", "add_comment"]);
    }

    #[tokio::test]
    async fn tool_error_sets_flag() {
        let channel =
            MockToolChannel::new().with_open_tool("get_issue", MockOutcome::ToolError("404".into()));
        let out = channel.call_tool("get_issue", Map::new()).await.unwrap();
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn lists_declared_tools() {
        let channel = MockToolChannel::new()
            .with_open_tool("a", MockOutcome::Text("1".into()))
            .with_open_tool("b", MockOutcome::Text("2".into()));
        let names: Vec<String> = channel
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_applies() {
        let channel = MockToolChannel::new()
            .with_open_tool("slow", MockOutcome::Text("done".into()))
            .with_latency(Duration::from_millis(200));
        let start = tokio::time::Instant::now();
        let _ = channel.call_tool("slow", Map::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unknown_tool_is_error() {
        let channel = MockToolChannel::new();
        assert!(channel.call_tool("nope", Map::new()).await.is_err());
    }
}
