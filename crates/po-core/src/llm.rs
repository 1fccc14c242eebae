// LLM adapter contract (spec §6 "LLM adapter contract", §9 streaming note)
//
// Grounded on `everruns-core::llm`/`traits::LlmProvider`, trimmed to the
// single contract the engine actually needs: `chat(system, messages, tools,
// stream?)`. Streaming is modeled per spec §9's fallback for languages
// where "a single call-and-stream is awkward": `chat_stream` hands back a
// channel of text chunks plus a future resolving to the final `LlmResponse`.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::capability::CapabilityDescriptor;
use crate::error::{EngineError, EngineResult};
use crate::message::{ToolCall, Usage};

pub type LlmChunkStream = Pin<Box<dyn Stream<Item = EngineResult<LlmStreamEvent>> + Send>>;

/// Events emitted during LLM streaming.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    TextDelta(String),
    ToolCalls(Vec<ToolCall>),
    Done(Usage),
    Error(String),
}

/// Message role in the adapter's own vocabulary (distinct from
/// `message::MessageRole` — tool results map to `Tool` here regardless of
/// how they're stored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: LlmMessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Per-call configuration: the PO's model choice plus the materialized tool
/// descriptor list (spec §4.3a: re-derived from the registry every turn).
#[derive(Debug, Clone)]
pub struct LlmCallConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<CapabilityDescriptor>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn needs_tool_execution(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The only interface the engine needs from any provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn chat_stream(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> EngineResult<LlmChunkStream>;

    /// Convenience non-streaming call built on `chat_stream`, mirroring
    /// `everruns-core`'s `chat_completion` default built on
    /// `chat_completion_stream`.
    async fn chat(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> EngineResult<LlmResponse> {
        use futures::StreamExt;

        let mut stream = self.chat_stream(system, messages, config).await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = Usage {
            model: config.model.clone(),
            provider: self.provider_name().to_string(),
            ..Default::default()
        };

        while let Some(event) = stream.next().await {
            match event? {
                LlmStreamEvent::TextDelta(delta) => content.push_str(&delta),
                LlmStreamEvent::ToolCalls(calls) => tool_calls = calls,
                LlmStreamEvent::Done(final_usage) => usage = final_usage,
                LlmStreamEvent::Error(err) => return Err(EngineError::llm(err)),
            }
        }

        Ok(LlmResponse {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls,
            usage,
        })
    }
}

/// Selects among configured providers by name (backs the `switch_llm`
/// WebSocket command, spec §4.9).
pub struct LlmRegistry {
    providers: std::collections::HashMap<String, std::sync::Arc<dyn LlmProvider>>,
    default: String,
}

impl LlmRegistry {
    pub fn new(default_name: impl Into<String>, default: std::sync::Arc<dyn LlmProvider>) -> Self {
        let default_name = default_name.into();
        let mut providers = std::collections::HashMap::new();
        providers.insert(default_name.clone(), default);
        Self {
            providers,
            default: default_name,
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: std::sync::Arc<dyn LlmProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn resolve(&self, name: Option<&str>) -> EngineResult<std::sync::Arc<dyn LlmProvider>> {
        let key = name.unwrap_or(&self.default);
        self.providers
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::config(format!("unknown llm provider: {key}")))
    }
}
