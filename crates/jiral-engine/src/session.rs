use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument};

use jiral_core::provider::{GenerationOptions, LlmProvider};
use jiral_core::tools::ToolChannel;
use jiral_settings::JiralSettings;

use crate::error::EngineError;
use crate::invoker::ToolInvoker;
use crate::orchestrator::{run_query, PassConfig, QueryContext};
use crate::pacer::Paced;
use crate::registry::ToolRegistry;

/// The chunk stream of one query. Lazy; dropping it abandons the query.
pub type QueryStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub primary_model: String,
    pub primary_options: GenerationOptions,
    pub summary_model: String,
    pub summary_options: GenerationOptions,
    pub chunk_delay: Duration,
    pub validate_arguments: bool,
    pub max_tool_output_bytes: usize,
    pub debug: bool,
}

impl SessionConfig {
    pub fn from_settings(settings: &JiralSettings) -> Self {
        Self {
            primary_model: settings.models.primary.clone(),
            primary_options: settings.generation.clone(),
            summary_model: settings.models.summary.clone(),
            summary_options: settings.summary_generation.clone(),
            chunk_delay: settings.chunk_delay(),
            validate_arguments: settings.validate_arguments,
            max_tool_output_bytes: settings.max_tool_output_bytes,
            debug: settings.debug,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&JiralSettings::default())
    }
}

/// A model backend plus a connected tool channel, built once and shared by
/// every query. Queries run one at a time.
pub struct Session {
    channel: Arc<dyn ToolChannel>,
    registry: Arc<ToolRegistry>,
    context: QueryContext,
    chunk_delay: Duration,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    /// List the channel's tools and register them. The only step that can
    /// fail on the tool side; later tool failures are folded into results.
    #[instrument(skip_all, fields(provider = provider.name(), channel = channel.name()))]
    pub async fn connect(
        provider: Arc<dyn LlmProvider>,
        channel: Arc<dyn ToolChannel>,
        config: SessionConfig,
    ) -> Result<Self, EngineError> {
        let descriptors = channel.list_tools().await?;
        let registry = Arc::new(ToolRegistry::new(descriptors));

        if config.debug {
            info!(tools = ?registry.names(), "connected to tool server");
        } else {
            debug!(count = registry.count(), "connected to tool server");
        }

        let invoker = Arc::new(ToolInvoker::new(
            channel.clone(),
            registry.clone(),
            config.validate_arguments,
            config.max_tool_output_bytes,
        ));
        let context = QueryContext {
            provider,
            invoker,
            tools: Arc::new(registry.function_tools().to_vec()),
            passes: Arc::new(PassConfig {
                primary_model: config.primary_model,
                primary_options: config.primary_options,
                summary_model: config.summary_model,
                summary_options: config.summary_options,
            }),
            debug: config.debug,
        };

        Ok(Self {
            channel,
            registry,
            context,
            chunk_delay: config.chunk_delay,
            gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<dyn ToolChannel> {
        &self.channel
    }

    /// Start a query. Empty (or whitespace-only) input is rejected here,
    /// before any backend work; every later failure arrives as an `Err`
    /// item on the stream.
    pub fn query(&self, query: &str) -> Result<QueryStream, EngineError> {
        if query.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        let stream = run_query(self.context.clone(), self.gate.clone(), query.to_string());
        Ok(Box::pin(Paced::new(stream, self.chunk_delay)))
    }

    /// Drive a query to completion and return the concatenated output.
    pub async fn answer(&self, query: &str) -> Result<String, EngineError> {
        let mut stream = self.query(query)?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}
