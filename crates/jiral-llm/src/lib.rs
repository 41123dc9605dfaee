pub mod converter;
pub mod ollama;

pub mod mock;

pub use mock::{MockProvider, MockResponse};
pub use ollama::OllamaProvider;
