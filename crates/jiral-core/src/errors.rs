/// Failures talking to the model backend.
///
/// Every variant is fatal to the query that hit it: there is no automatic
/// retry, the error surfaces to the caller as a failed stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Error reported by the backend inside an otherwise healthy stream.
    #[error("backend error: {0}")]
    Backend(String),
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound(_) => "model_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Backend(_) => "backend_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            404 => Self::ModelNotFound(body),
            500..=599 => Self::ServerError { status, body },
            400..=499 => Self::InvalidRequest(body),
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}
