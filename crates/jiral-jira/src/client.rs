use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use jiral_settings::JiraSettings;

use crate::adf;
use crate::error::JiraError;

static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[A-Z][A-Z0-9_]*-\d+$").unwrap());

/// Reject anything that is not a plain issue key before it reaches a URL.
/// Case is not checked; Jira resolves `proj-1` to `PROJ-1` itself.
pub fn validate_issue_key(key: &str) -> Result<(), JiraError> {
    if ISSUE_KEY.is_match(key) {
        Ok(())
    } else {
        Err(JiraError::InvalidIssueKey(key.to_string()))
    }
}

/// Connection details for one Jira Cloud site.
#[derive(Clone)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    pub api_token: SecretString,
}

impl std::fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraConfig")
            .field("domain", &self.domain)
            .field("email", &self.email)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

impl JiraConfig {
    pub fn from_settings(settings: &JiraSettings) -> Result<Self, JiraError> {
        let missing = |what: &str| JiraError::Config(format!("{what} is not set"));
        Ok(Self {
            domain: settings.domain.clone().ok_or_else(|| missing("JIRA_DOMAIN"))?,
            email: settings.email.clone().ok_or_else(|| missing("JIRA_EMAIL"))?,
            api_token: settings.api_token.clone().ok_or_else(|| missing("JIRA_API"))?,
        })
    }

    /// `{domain}/rest/api/3`, with a scheme added when the domain has none.
    pub fn api_base(&self) -> String {
        let domain = self.domain.trim().trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            format!("{domain}/rest/api/3")
        } else {
            format!("https://{domain}/rest/api/3")
        }
    }

    fn basic_auth(&self) -> String {
        let credentials = format!("{}:{}", self.email, self.api_token.expose_secret());
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }
}

/// Fields for a new issue. Optional fields are left out of the request
/// when absent or empty.
#[derive(Clone, Debug, Default)]
pub struct NewIssue {
    pub project_key: String,
    pub issue_type: String,
    pub summary: String,
    pub description: Option<String>,
    pub priority: Option<String>,
}

impl NewIssue {
    pub fn to_body(&self) -> Value {
        let mut fields = Map::new();
        fields.insert("project".into(), json!({"key": self.project_key}));
        fields.insert("issuetype".into(), json!({"name": self.issue_type}));
        fields.insert("summary".into(), json!(self.summary));
        if let Some(description) = non_empty(&self.description) {
            fields.insert("description".into(), adf::paragraph_doc(description));
        }
        if let Some(priority) = non_empty(&self.priority) {
            fields.insert("priority".into(), json!({"name": priority}));
        }
        json!({"fields": fields})
    }
}

/// Field changes for an existing issue.
#[derive(Clone, Debug, Default)]
pub struct IssueUpdate {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
}

impl IssueUpdate {
    /// The `fields` object for a PUT, or `None` when nothing changes.
    pub fn to_fields(&self) -> Option<Map<String, Value>> {
        let mut fields = Map::new();
        if let Some(summary) = non_empty(&self.summary) {
            fields.insert("summary".into(), json!(summary));
        }
        if let Some(description) = non_empty(&self.description) {
            fields.insert("description".into(), adf::paragraph_doc(description));
        }
        if let Some(priority) = non_empty(&self.priority) {
            fields.insert("priority".into(), json!({"name": priority}));
        }
        (!fields.is_empty()).then_some(fields)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TransitionList {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

/// One row of a search result, flattened for the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IssueSummary {
    pub key: String,
    pub summary: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

impl IssueSummary {
    fn from_issue(issue: &Value) -> Self {
        let fields = &issue["fields"];
        let text = |v: &Value| v.as_str().map(str::to_string);
        Self {
            key: issue["key"].as_str().unwrap_or_default().to_string(),
            summary: text(&fields["summary"]),
            status: text(&fields["status"]["name"]),
            priority: text(&fields["priority"]["name"]),
            created: text(&fields["created"]),
            updated: text(&fields["updated"]),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchPage {
    pub total: u64,
    pub issues: Vec<IssueSummary>,
}

/// Thin client over the Jira Cloud REST API v3.
#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base: String,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Result<Self, JiraError> {
        let mut auth = HeaderValue::from_str(&config.basic_auth())
            .map_err(|e| JiraError::Config(format!("credentials: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| JiraError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base: config.api_base(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, JiraError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "jira request failed");
        Err(JiraError::from_response(status.as_u16(), &body))
    }

    #[instrument(skip(self))]
    pub async fn get_issue(&self, key: &str) -> Result<Value, JiraError> {
        validate_issue_key(key)?;
        let response = self.send(self.http.get(self.url(&format!("/issue/{key}")))).await?;
        Ok(response.json().await?)
    }

    /// Returns the key of the created issue.
    #[instrument(skip_all, fields(project = %issue.project_key))]
    pub async fn create_issue(&self, issue: &NewIssue) -> Result<String, JiraError> {
        let response = self
            .send(self.http.post(self.url("/issue")).json(&issue.to_body()))
            .await?;
        let created: CreatedIssue = response.json().await?;
        Ok(created.key)
    }

    #[instrument(skip(self))]
    pub async fn transitions(&self, key: &str) -> Result<Vec<Transition>, JiraError> {
        validate_issue_key(key)?;
        let response = self
            .send(self.http.get(self.url(&format!("/issue/{key}/transitions"))))
            .await?;
        let list: TransitionList = response.json().await?;
        Ok(list.transitions)
    }

    #[instrument(skip(self))]
    pub async fn transition(&self, key: &str, transition_id: &str) -> Result<(), JiraError> {
        validate_issue_key(key)?;
        self.send(
            self.http
                .post(self.url(&format!("/issue/{key}/transitions")))
                .json(&json!({"transition": {"id": transition_id}})),
        )
        .await?;
        Ok(())
    }

    /// Move an issue to the transition whose name matches `status`,
    /// ignoring case.
    pub async fn transition_to(&self, key: &str, status: &str) -> Result<(), JiraError> {
        let transitions = self.transitions(key).await?;
        let wanted = status.to_lowercase();
        let transition = transitions
            .iter()
            .find(|t| t.name.to_lowercase() == wanted)
            .ok_or_else(|| JiraError::UnknownStatus(status.to_string()))?;
        self.transition(key, &transition.id).await
    }

    #[instrument(skip(self, fields))]
    pub async fn update_fields(&self, key: &str, fields: Map<String, Value>) -> Result<(), JiraError> {
        validate_issue_key(key)?;
        self.send(
            self.http
                .put(self.url(&format!("/issue/{key}")))
                .json(&json!({"fields": fields})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn search(&self, jql: &str, max_results: u32) -> Result<SearchPage, JiraError> {
        let response = self
            .send(
                self.http
                    .post(self.url("/search"))
                    .json(&json!({"jql": jql, "maxResults": max_results})),
            )
            .await?;
        let body: Value = response.json().await?;
        let issues: Vec<IssueSummary> = body["issues"]
            .as_array()
            .map(|list| list.iter().map(IssueSummary::from_issue).collect())
            .unwrap_or_default();
        let total = body["total"].as_u64().unwrap_or(issues.len() as u64);
        Ok(SearchPage { total, issues })
    }

    #[instrument(skip(self, comment))]
    pub async fn add_comment(&self, key: &str, comment: &str) -> Result<(), JiraError> {
        validate_issue_key(key)?;
        self.send(
            self.http
                .post(self.url(&format!("/issue/{key}/comment")))
                .json(&json!({"body": adf::paragraph_doc(comment)})),
        )
        .await?;
        Ok(())
    }
}
