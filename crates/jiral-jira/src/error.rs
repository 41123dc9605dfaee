use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum JiraError {
    #[error("Jira is not configured: {0}")]
    Config(String),

    #[error("invalid issue key '{0}' (expected e.g. PROJ-123)")]
    InvalidIssueKey(String),

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("{0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("Status \"{0}\" not found in available transitions")]
    UnknownStatus(String),

    #[error("{0}")]
    Invalid(String),

    #[error("MCP server error: {0}")]
    Serve(String),
}

impl JiraError {
    /// Build an HTTP error from a Jira error body. Jira reports failures as
    /// `{"errorMessages": [...], "errors": {field: message}}`; anything else
    /// falls back to the status line.
    pub fn from_response(status: u16, body: &str) -> Self {
        let mut parts: Vec<String> = Vec::new();
        if let Ok(json) = serde_json::from_str::<Value>(body) {
            if let Some(messages) = json.get("errorMessages").and_then(Value::as_array) {
                parts.extend(messages.iter().filter_map(Value::as_str).map(str::to_string));
            }
            if let Some(errors) = json.get("errors").and_then(Value::as_object) {
                parts.extend(
                    errors
                        .iter()
                        .filter_map(|(field, msg)| msg.as_str().map(|m| format!("{field}: {m}"))),
                );
            }
        }

        let message = if parts.is_empty() {
            format!("Request failed with status code {status}")
        } else {
            format!("Request failed with status code {status}: {}", parts.join("; "))
        };
        Self::Http { status, message }
    }
}

impl From<reqwest::Error> for JiraError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
