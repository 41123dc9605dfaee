use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::client::{validate_issue_key, IssueUpdate, JiraClient, NewIssue};
use crate::error::JiraError;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetIssueArgs {
    /// The key of the issue to retrieve (e.g., PROJ-123)
    pub issue_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIssueArgs {
    /// The project key (e.g., PROJ)
    pub project_key: String,
    /// The issue type (e.g., Bug, Task, Story)
    pub issue_type: String,
    /// The issue summary
    pub summary: String,
    /// The issue description
    #[serde(default)]
    pub description: Option<String>,
    /// The priority of the issue
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIssueArgs {
    /// The key of the issue to update (e.g., PROJ-123)
    pub issue_key: String,
    /// The updated summary
    #[serde(default)]
    pub summary: Option<String>,
    /// The updated description
    #[serde(default)]
    pub description: Option<String>,
    /// The new status
    #[serde(default)]
    pub status: Option<String>,
    /// The new priority
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchIssuesArgs {
    /// The JQL query string
    pub jql: String,
    /// Maximum number of results to return
    #[serde(default = "default_max_results")]
    #[schemars(range(min = 1, max = 100))]
    pub max_results: u32,
}

fn default_max_results() -> u32 {
    50
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddCommentArgs {
    /// The key of the issue to comment on (e.g., PROJ-123)
    pub issue_key: String,
    /// The comment text
    pub comment: String,
}

fn text(body: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(body.into())]))
}

/// Failures go back to the model as error results, never as protocol errors.
fn failed(doing: &str, error: JiraError) -> Result<CallToolResult, ErrorData> {
    warn!(error = %error, "jira tool failed");
    let message = match error {
        JiraError::UnknownStatus(_) => error.to_string(),
        _ => format!("Error {doing}: {error}"),
    };
    Ok(CallToolResult::error(vec![Content::text(message)]))
}

fn pretty<T: serde::Serialize>(value: &T) -> Result<String, JiraError> {
    serde_json::to_string_pretty(value).map_err(|e| JiraError::Decode(e.to_string()))
}

/// MCP server exposing Jira issue operations as tools.
#[derive(Clone)]
pub struct JiraServer {
    client: JiraClient,
    tool_router: ToolRouter<JiraServer>,
}

#[tool_router]
impl JiraServer {
    pub fn new(client: JiraClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Get a Jira issue by key")]
    async fn get_issue(
        &self,
        Parameters(args): Parameters<GetIssueArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = async {
            let issue = self.client.get_issue(&args.issue_key).await?;
            pretty(&issue)
        };
        match result.await {
            Ok(body) => text(body),
            Err(e) => failed("fetching issue", e),
        }
    }

    #[tool(description = "Create a new Jira issue")]
    async fn create_issue(
        &self,
        Parameters(args): Parameters<CreateIssueArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let issue = NewIssue {
            project_key: args.project_key,
            issue_type: args.issue_type,
            summary: args.summary,
            description: args.description,
            priority: args.priority,
        };
        match self.client.create_issue(&issue).await {
            Ok(key) => {
                info!(key = %key, "issue created");
                text(format!("Issue created successfully. Key: {key}"))
            }
            Err(e) => failed("creating issue", e),
        }
    }

    #[tool(description = "Update an existing Jira issue; status changes go through workflow transitions")]
    async fn update_issue(
        &self,
        Parameters(args): Parameters<UpdateIssueArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let key = args.issue_key.clone();
        let result = async {
            validate_issue_key(&key)?;
            if let Some(status) = args.status.as_deref().filter(|s| !s.is_empty()) {
                self.client.transition_to(&key, status).await?;
            }
            let update = IssueUpdate {
                summary: args.summary,
                description: args.description,
                priority: args.priority,
            };
            if let Some(fields) = update.to_fields() {
                self.client.update_fields(&key, fields).await?;
            }
            Ok::<_, JiraError>(())
        };
        match result.await {
            Ok(()) => text(format!("Issue {key} updated successfully")),
            Err(e) => failed("updating issue", e),
        }
    }

    #[tool(description = "Search for Jira issues using JQL")]
    async fn search_issues(
        &self,
        Parameters(args): Parameters<SearchIssuesArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = async {
            if !(1..=100).contains(&args.max_results) {
                return Err(JiraError::Invalid(format!(
                    "maxResults must be between 1 and 100, got {}",
                    args.max_results
                )));
            }
            let page = self.client.search(&args.jql, args.max_results).await?;
            let rows = pretty(&page.issues)?;
            Ok(format!(
                "Found {} issues. Showing {}:\n\n{rows}",
                page.total,
                page.issues.len()
            ))
        };
        match result.await {
            Ok(body) => text(body),
            Err(e) => failed("searching issues", e),
        }
    }

    #[tool(description = "Add a comment to a Jira issue")]
    async fn add_comment(
        &self,
        Parameters(args): Parameters<AddCommentArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        match self.client.add_comment(&args.issue_key, &args.comment).await {
            Ok(()) => text(format!("Comment added to issue {} successfully", args.issue_key)),
            Err(e) => failed("adding comment", e),
        }
    }
}

#[tool_handler]
impl ServerHandler for JiraServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some("Tools for reading and updating Jira issues".to_string()),
            ..Default::default()
        }
    }
}
