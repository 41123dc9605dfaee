use jiral_core::errors::GatewayError;
use jiral_core::tools::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected before any backend work starts.
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Only raised while connecting; tool calls absorb channel failures.
    #[error("tool channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Input errors are the caller's fault; everything else is a failure of
    /// the query.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyQuery)
    }
}
