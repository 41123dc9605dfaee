use serde::Deserialize;
use serde_json::{json, Map, Value};

use jiral_core::errors::GatewayError;
use jiral_core::messages::{ChatMessage, Role};
use jiral_core::provider::{ChatRequest, GenerationOptions};
use jiral_core::stream::{StreamEvent, Usage};
use jiral_core::tools::ToolCallIntent;

/// Convert a ChatRequest into the `/api/chat` request body.
pub fn build_request_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "stream": true,
        "messages": request.messages.iter().map(convert_message).collect::<Vec<_>>(),
    });

    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }

    let options = convert_options(&request.options);
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }

    body
}

fn convert_message(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut value = json!({"role": role, "content": msg.content});
    if msg.has_tool_calls() {
        value["tool_calls"] = msg
            .tool_calls
            .iter()
            .map(|call| json!({"function": {"name": call.name, "arguments": call.arguments}}))
            .collect();
    }
    value
}

/// Backend option names: `num_predict`, `temperature`, `num_ctx`.
fn convert_options(options: &GenerationOptions) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(max) = options.max_tokens {
        let _ = out.insert("num_predict".into(), json!(max));
    }
    if let Some(temp) = options.temperature {
        let _ = out.insert("temperature".into(), json!(temp));
    }
    if let Some(ctx) = options.context_window {
        let _ = out.insert("num_ctx".into(), json!(ctx));
    }
    out
}

// ── Response lines ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// State machine turning NDJSON response lines into StreamEvents.
///
/// Accumulates the text and tool calls so the final `Done` carries the
/// complete assistant message.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    started: bool,
    content: String,
    tool_calls: Vec<ToolCallIntent>,
    finished: bool,
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// A terminal event (`Done` or `Error`) has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one response line and return zero or more StreamEvents.
    pub fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim();
        if line.is_empty() || self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                events.push(StreamEvent::Error {
                    error: GatewayError::MalformedResponse(format!("{e}: {line}")),
                });
                return events;
            }
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            events.push(StreamEvent::Error {
                error: GatewayError::Backend(error),
            });
            return events;
        }

        if let Some(message) = chunk.message {
            self.content.push_str(&message.content);
            // A line carrying a decision yields only the decision; its text
            // stays in the final message but is never streamed.
            if !message.tool_calls.is_empty() {
                let calls: Vec<ToolCallIntent> = message
                    .tool_calls
                    .into_iter()
                    .map(|c| ToolCallIntent::new(c.function.name, arguments_object(c.function.arguments)))
                    .collect();
                self.tool_calls.extend(calls.iter().cloned());
                events.push(StreamEvent::ToolCalls { calls });
            } else if !message.content.is_empty() {
                events.push(StreamEvent::TextDelta {
                    delta: message.content,
                });
            }
        }

        if chunk.done {
            self.finished = true;
            let usage = match (chunk.prompt_eval_count, chunk.eval_count) {
                (None, None) => None,
                (p, c) => Some(Usage {
                    prompt_tokens: p.unwrap_or(0),
                    completion_tokens: c.unwrap_or(0),
                }),
            };
            let mut message = ChatMessage::assistant(std::mem::take(&mut self.content));
            message.tool_calls = std::mem::take(&mut self.tool_calls);
            events.push(StreamEvent::Done { message, usage });
        }

        events
    }
}

/// Arguments normally arrive as an object. Some models send a JSON string
/// instead; anything else becomes an empty map.
fn arguments_object(arguments: Value) -> Map<String, Value> {
    match arguments {
        Value::Object(map) => map,
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}
