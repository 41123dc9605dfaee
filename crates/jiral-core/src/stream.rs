use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::messages::ChatMessage;
use crate::tools::ToolCallIntent;

/// Events emitted while a model response streams in. Ordering contract:
///
/// Start → (TextDelta | ToolCalls)* → Done
///
/// Error can appear at any point and ends the stream.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    /// A tool-call decision. Every call the backend issued at this point is
    /// in `calls`, in issuance order.
    ToolCalls { calls: Vec<ToolCallIntent> },
    Done { message: ChatMessage, usage: Option<Usage> },
    Error { error: GatewayError },
}

/// Token accounting reported when a response finishes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    pub fn is_content_delta(&self) -> bool {
        matches!(self, Self::TextDelta { .. })
    }
}
