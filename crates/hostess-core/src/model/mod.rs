//! Chat-model port (OpenAI chat-completions shaped).

pub mod client;
pub mod mock;
pub mod types;
