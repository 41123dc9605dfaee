//! # jiral-engine
//!
//! Tool-calling orchestration between a model backend and a tool channel.
//!
//! - **Registry**: maps tool descriptors onto the backend's function-calling shape
//! - **Invoker**: runs one tool call, folding every failure into a `ToolResult`
//! - **Orchestrator**: primary pass → tool calls with progress markers → summary pass
//! - **Pacer**: spaces released chunks for a typing effect
//! - **Session**: the long-lived handle that owns all of the above
//!
//! ## Crate Position
//!
//! Depends on: jiral-core, jiral-settings.
//! Depended on by: jiral-server, the `jiral` binary.

#![deny(unsafe_code)]

pub mod error;
pub mod invoker;
pub mod markers;
pub mod orchestrator;
pub mod pacer;
pub mod registry;
pub mod schema;
pub mod session;
pub mod truncate;

pub use error::EngineError;
pub use invoker::ToolInvoker;
pub use orchestrator::PassConfig;
pub use pacer::Paced;
pub use registry::{register, ToolRegistry};
pub use session::{QueryStream, Session, SessionConfig};
