use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::messages::{ChatMessage, Role};
use crate::stream::StreamEvent;

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

/// Function-calling entry in the form the backend expects:
/// `{"type": "function", "function": {name, description, parameters}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One request to the model backend.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Empty means no tool schema is attached.
    pub tools: Vec<FunctionTool>,
    pub options: GenerationOptions,
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Trait implemented by each model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, GatewayError>;

    /// Non-streaming form: drive the stream and return the final message.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatMessage, GatewayError> {
        let mut stream = self.stream(request).await?;
        let mut message = ChatMessage::assistant("");

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::TextDelta { delta } => message.content.push_str(&delta),
                StreamEvent::ToolCalls { calls } => message.tool_calls.extend(calls),
                StreamEvent::Done { message: done, .. } => {
                    if done.role == Role::Assistant
                        && (!done.content.is_empty() || done.has_tool_calls())
                    {
                        return Ok(done);
                    }
                    return Ok(message);
                }
                StreamEvent::Error { error } => return Err(error),
                StreamEvent::Start => {}
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCallIntent;

    struct Scripted(Vec<StreamEvent>);

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<EventStream, GatewayError> {
            Ok(Box::pin(futures::stream::iter(self.0.clone())))
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            options: GenerationOptions::default(),
        }
    }

    #[test]
    fn generation_options_skip_unset_fields() {
        let json = serde_json::to_value(GenerationOptions::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn function_tool_wire_shape() {
        let tool = FunctionTool {
            kind: "function".into(),
            function: FunctionSpec {
                name: "get_issue".into(),
                description: "Fetch an issue".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_issue");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn complete_accumulates_deltas() {
        let provider = Scripted(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: "4".into() },
            StreamEvent::TextDelta { delta: ".".into() },
            StreamEvent::Done {
                message: ChatMessage::assistant(""),
                usage: None,
            },
        ]);
        let msg = provider.complete(&request()).await.unwrap();
        assert_eq!(msg.content, "4.");
    }

    #[tokio::test]
    async fn complete_collects_tool_calls() {
        let provider = Scripted(vec![
            StreamEvent::ToolCalls {
                calls: vec![ToolCallIntent::new("get_issue", serde_json::Map::new())],
            },
            StreamEvent::Done {
                message: ChatMessage::assistant(""),
                usage: None,
            },
        ]);
        let msg = provider.complete(&request()).await.unwrap();
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn complete_surfaces_stream_error() {
        let provider = Scripted(vec![
            StreamEvent::TextDelta { delta: "par".into() },
            StreamEvent::Error {
                error: GatewayError::StreamInterrupted("eof".into()),
            },
        ]);
        let result = provider.complete(&request()).await;
        assert!(matches!(result, Err(GatewayError::StreamInterrupted(_))));
    }
}
