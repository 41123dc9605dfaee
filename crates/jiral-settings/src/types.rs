//! Settings types. JSON keys are camelCase; every field has a default so a
//! partial file is always enough.

use std::time::Duration;

use jiral_core::provider::GenerationOptions;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JiralSettings {
    pub ollama: OllamaSettings,
    pub models: ModelSettings,
    /// Options for the tool-aware first pass.
    pub generation: GenerationOptions,
    /// Options for the summarization pass.
    pub summary_generation: GenerationOptions,
    /// Diagnostic logging of registered tools and per-query elapsed time.
    pub debug: bool,
    /// Delay between released output chunks. 0 disables pacing.
    pub chunk_delay_ms: u64,
    /// Check tool-call arguments against the declared input schema.
    pub validate_arguments: bool,
    pub max_tool_output_bytes: usize,
    pub server: ServerSettings,
    pub tools: ToolServerSettings,
    pub jira: JiraSettings,
}

impl Default for JiralSettings {
    fn default() -> Self {
        Self {
            ollama: OllamaSettings::default(),
            models: ModelSettings::default(),
            generation: GenerationOptions {
                max_tokens: Some(512),
                temperature: Some(0.7),
                context_window: Some(2048),
            },
            summary_generation: GenerationOptions::default(),
            debug: false,
            chunk_delay_ms: 50,
            validate_arguments: true,
            max_tool_output_bytes: 64 * 1024,
            server: ServerSettings::default(),
            tools: ToolServerSettings::default(),
            jira: JiraSettings::default(),
        }
    }
}

impl JiralSettings {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OllamaSettings {
    pub base_url: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
        }
    }
}

/// The two passes run against separately configured models.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub primary: String,
    pub summary: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            primary: "qwen3:14b".into(),
            summary: "gemma3:27b".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// How to launch the tool server. `None` means the running executable with
/// the `jira-server` subcommand.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolServerSettings {
    pub command: Option<String>,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JiraSettings {
    /// Site root, e.g. `https://acme.atlassian.net`.
    pub domain: Option<String>,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub api_token: Option<SecretString>,
}
