use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, instrument, warn};

use jiral_core::tools::{ToolCallIntent, ToolChannel, ToolResult};

use crate::registry::ToolRegistry;
use crate::schema;
use crate::truncate;

/// Runs one tool call against the channel and folds every failure into a
/// [`ToolResult`]. Nothing escapes `invoke`, not even a panic.
pub struct ToolInvoker {
    channel: Arc<dyn ToolChannel>,
    registry: Arc<ToolRegistry>,
    validate_arguments: bool,
    max_output_bytes: usize,
}

impl ToolInvoker {
    pub fn new(
        channel: Arc<dyn ToolChannel>,
        registry: Arc<ToolRegistry>,
        validate_arguments: bool,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            channel,
            registry,
            validate_arguments,
            max_output_bytes,
        }
    }

    #[instrument(skip(self, call), fields(tool = %call.name, call_id = %call.id))]
    pub async fn invoke(&self, call: &ToolCallIntent) -> ToolResult {
        if self.validate_arguments {
            let Some(descriptor) = self.registry.get(&call.name) else {
                warn!("model requested an unregistered tool");
                return ToolResult::failure(&call.name, format!("unknown tool: {}", call.name));
            };
            if let Err(e) = schema::validate_arguments(&descriptor.input_schema, &call.arguments) {
                warn!(error = %e, "tool arguments rejected");
                return ToolResult::failure(&call.name, format!("invalid arguments: {e}"));
            }
        }

        let start = Instant::now();
        let outcome = std::panic::AssertUnwindSafe(
            self.channel.call_tool(&call.name, call.arguments.clone()),
        )
        .catch_unwind()
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(output)) if output.is_error => {
                debug!(duration_ms, "tool reported an error");
                ToolResult::failure(&call.name, output.text())
            }
            Ok(Ok(output)) => {
                debug!(duration_ms, "tool completed");
                let content = truncate::truncate_output(&output.text(), self.max_output_bytes);
                ToolResult::success(&call.name, content)
            }
            Ok(Err(e)) => {
                warn!(error = %e, duration_ms, "tool call failed");
                ToolResult::failure(&call.name, e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(panic = %msg, "tool channel panicked");
                ToolResult::failure(&call.name, "Internal error: tool crashed")
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
