//! Tool-execution channels: the MCP client used in production and a
//! scripted channel for tests.

pub mod channel;
pub mod command;
pub mod mock;

pub use channel::McpToolChannel;
pub use command::ServerCommand;
pub use mock::{MockOutcome, MockToolChannel};
