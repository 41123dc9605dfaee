use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use jiral_engine::{EngineError, Session};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub query: Option<String>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns once the listener is bound.
pub async fn start(config: ServerConfig, session: Arc<Session>) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState { session });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "jiral server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight responses to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }

    /// Run until the server task exits.
    pub async fn wait(self) {
        let _ = self.server.await;
    }
}

fn query_required() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "Query parameter required"})),
    )
        .into_response()
}

/// Streams the orchestrator's chunks as a chunked plain-text body. A
/// failed query aborts the body instead of ending it cleanly.
async fn chat_handler(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let query = match body {
        Ok(Json(ChatBody { query: Some(q) })) => q,
        Ok(_) => return query_required(),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable chat body");
            return query_required();
        }
    };

    let stream = match state.session.query(&query) {
        Ok(stream) => stream,
        Err(e) if e.is_input_error() => return query_required(),
        Err(e) => {
            tracing::error!(error = %e, "failed to start query");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response();
        }
    };

    let body = stream.then(|chunk| async move {
        match chunk {
            Ok(text) => Ok(Bytes::from(text)),
            Err(e) => {
                tracing::warn!(error = %e, "aborting chat response");
                // hyper drops its write buffer on a body error. Return Pending
                // once so the head and earlier chunks are flushed first.
                tokio::task::yield_now().await;
                Err::<Bytes, EngineError>(e)
            }
        }
    });

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "tools": state.session.tool_names(),
    }))
}
