use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ToolCallId;

/// A tool as declared by the tool-execution channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A decision by the model to invoke one tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallIntent {
    #[serde(default)]
    pub id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallIntent {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one tool invocation. Failures carry the error text instead of
/// aborting the query.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { tool_name: String, content: String },
    Failure { tool_name: String, error: String },
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Success {
            tool_name: tool_name.into(),
            content: content.into(),
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failure {
            tool_name: tool_name.into(),
            error: error.into(),
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::Success { tool_name, .. } | Self::Failure { tool_name, .. } => tool_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The line this result contributes to the summarization prompt.
    pub fn to_prompt_line(&self) -> String {
        match self {
            Self::Success { tool_name, content } => format!("{tool_name}: {content}"),
            Self::Failure { tool_name, error } => format!("{tool_name} failed: {error}"),
        }
    }
}

/// Raw response of the tool-execution channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    /// Structured payload, opaque to the orchestrator.
    pub content: Value,
    /// The remote tool reported a failure.
    pub is_error: bool,
}

impl ToolOutput {
    /// Concatenate the `text` parts of an MCP-style content list, falling
    /// back to the JSON serialization for anything else.
    pub fn text(&self) -> String {
        if let Some(parts) = self.content.as_array() {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            if texts.len() == parts.len() && !texts.is_empty() {
                return texts.join("\n");
            }
        }
        self.content.to_string()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("tool channel closed")]
    Closed,
}

/// The external channel tools are executed through (an MCP server, a mock).
#[async_trait]
pub trait ToolChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ChannelError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ChannelError>;
}
