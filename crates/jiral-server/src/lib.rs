//! # jiral-server
//!
//! HTTP surface over a [`jiral_engine::Session`]: `POST /chat` streams the
//! answer as plain text, `GET /health` reports the registered tools.

pub mod server;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
