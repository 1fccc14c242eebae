//! Anthropic Messages API adapter implementing `po_core::llm::LlmProvider`.

pub mod provider;
pub mod types;

pub use provider::AnthropicProvider;
