use std::borrow::Cow;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::service::{RunningService, ServiceError};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use jiral_core::tools::{ChannelError, ToolChannel, ToolDescriptor, ToolOutput};

use crate::command::ServerCommand;

type McpClient = RunningService<RoleClient, ()>;

/// Tool channel backed by one MCP client connection.
///
/// The connection is a single bound session with one server process; the
/// caller serializes queries that use it.
pub struct McpToolChannel {
    name: String,
    client: McpClient,
}

impl McpToolChannel {
    /// Launch the tool server and complete the MCP handshake over its stdio.
    /// The child's stderr is inherited so its logs stay visible.
    pub async fn spawn(command: &ServerCommand) -> Result<Self, ChannelError> {
        info!(command = %command.display(), "starting tool server");

        let transport = TokioChildProcess::new(
            tokio::process::Command::new(&command.program).configure(|cmd| {
                cmd.args(&command.args)
                    .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .stderr(std::process::Stdio::inherit());
            }),
        )
        .map_err(|e| ChannelError::Transport(format!("spawn {}: {e}", command.program)))?;

        let client = ()
            .serve(transport)
            .await
            .map_err(|e| ChannelError::Protocol(format!("initialize: {e}")))?;

        Ok(Self::from_client(command.display(), client))
    }

    /// Connect over any rmcp transport (an in-process duplex in tests).
    pub async fn connect<T, E, A>(name: impl Into<String>, transport: T) -> Result<Self, ChannelError>
    where
        T: rmcp::transport::IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let client = ()
            .serve(transport)
            .await
            .map_err(|e| ChannelError::Protocol(format!("initialize: {e}")))?;
        Ok(Self::from_client(name, client))
    }

    fn from_client(name: impl Into<String>, client: McpClient) -> Self {
        let name = name.into();
        debug!(channel = %name, "tool channel connected");
        Self { name, client }
    }

    /// Cancel the session. Dropping the channel has the same effect and
    /// also terminates a spawned child.
    pub async fn shutdown(self) -> Result<(), ChannelError> {
        self.client
            .cancel()
            .await
            .map(|reason| debug!(?reason, "tool channel closed"))
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ToolChannel for McpToolChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ChannelError> {
        let tools = self.client.list_all_tools().await.map_err(map_service_error)?;
        Ok(tools.into_iter().map(descriptor_from_tool).collect())
    }

    #[instrument(skip(self, arguments), fields(channel = %self.name))]
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ChannelError> {
        let request = CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments: Some(arguments),
        };

        let result = self.client.call_tool(request).await.map_err(map_service_error)?;
        output_from_result(result)
    }
}

fn descriptor_from_tool(tool: Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name.into_owned(),
        description: tool.description.map(Cow::into_owned).unwrap_or_default(),
        input_schema: Value::Object((*tool.input_schema).clone()),
    }
}

fn output_from_result(result: CallToolResult) -> Result<ToolOutput, ChannelError> {
    let is_error = result.is_error.unwrap_or(false);
    let content = match (result.content.is_empty(), result.structured_content) {
        (true, Some(structured)) => structured,
        _ => serde_json::to_value(&result.content)
            .map_err(|e| ChannelError::Protocol(format!("unserializable tool content: {e}")))?,
    };
    Ok(ToolOutput { content, is_error })
}

fn map_service_error(err: ServiceError) -> ChannelError {
    match err {
        ServiceError::TransportClosed => ChannelError::Closed,
        ServiceError::McpError(data) => ChannelError::Protocol(data.message.into_owned()),
        other => ChannelError::Transport(other.to_string()),
    }
}
