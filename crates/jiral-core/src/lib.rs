pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tools;
