//! # jiral-jira
//!
//! Jira Cloud REST client and the MCP tool server that exposes it:
//! `get_issue`, `create_issue`, `update_issue`, `search_issues` and
//! `add_comment`. Meant to run as a child process speaking MCP over stdio,
//! so nothing here writes to stdout except the protocol itself.

#![deny(unsafe_code)]

pub mod adf;
pub mod client;
pub mod error;
pub mod server;

pub use client::{JiraClient, JiraConfig};
pub use error::JiraError;
pub use server::JiraServer;

use rmcp::ServiceExt;

/// Serve the Jira tools on stdin/stdout until the client disconnects.
pub async fn serve_stdio(client: JiraClient) -> Result<(), JiraError> {
    tracing::info!(base = client.base_url(), "jira tool server starting");
    let service = JiraServer::new(client)
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| JiraError::Serve(e.to_string()))?;
    let reason = service
        .waiting()
        .await
        .map_err(|e| JiraError::Serve(e.to_string()))?;
    tracing::info!(?reason, "jira tool server stopped");
    Ok(())
}
