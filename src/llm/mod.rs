pub mod client;
pub mod openai_compatible;
pub mod types;

pub use client::LlmClient;
pub use openai_compatible::OpenAiCompatibleClient;
