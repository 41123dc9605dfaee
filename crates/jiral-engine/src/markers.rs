//! Progress text injected into the output stream around tool calls, and
//! the summarization prompt.

use jiral_core::tools::ToolResult;

pub const PROCESSING: &str = "\n[Processing tool requests...]\n";

pub fn tool_start(name: &str) -> String {
    format!("\n⚙️ Calling {name}... ")
}

pub fn tool_success(name: &str) -> String {
    format!("✅ {name} completed!\n")
}

pub fn tool_failure(name: &str, error: &str) -> String {
    format!("❌ {name} failed: {error}\n")
}

/// The marker that closes a tool call, chosen by outcome.
pub fn tool_end(result: &ToolResult) -> String {
    match result {
        ToolResult::Success { tool_name, .. } => tool_success(tool_name),
        ToolResult::Failure { tool_name, error } => tool_failure(tool_name, error),
    }
}

/// System prompt for the summarization pass. Failed calls are included so
/// the model can explain what went wrong.
pub fn summary_prompt(results: &[ToolResult]) -> String {
    let lines: Vec<String> = results.iter().map(ToolResult::to_prompt_line).collect();
    format!(
        "Tool results:\n{}\n\nSummarize these findings clearly and concisely.",
        lines.join("\n")
    )
}
