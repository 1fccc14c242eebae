// `po_core::llm::LlmProvider` implementation for the Anthropic Messages
// API. No teacher source exists for this vendor; the request-building /
// SSE-accumulation shape is grounded on `po-openai::provider`'s adapter
// instead, using the same reqwest + eventsource-stream idiom with an
// event vocabulary specific to this API (content blocks instead of a
// flat delta, a separate top-level `system` field, `input_json_delta`
// fragments for tool-call arguments).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;

use po_core::capability::CapabilityDescriptor;
use po_core::error::{EngineError, EngineResult};
use po_core::llm::{LlmCallConfig, LlmChunkStream, LlmMessage, LlmMessageRole, LlmProvider, LlmStreamEvent};
use po_core::message::{ToolCall, Usage};

use crate::types::{
    AnthropicContentBlock, AnthropicErrorBody, AnthropicMessage, AnthropicRequest,
    AnthropicStreamContentBlock, AnthropicStreamDelta, AnthropicStreamEvent, AnthropicTool,
    ANTHROPIC_VERSION,
};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Reads `ANTHROPIC_API_KEY` (spec §6 "Environment variables").
    pub fn from_env() -> EngineResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| EngineError::config("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    /// Anthropic takes `system` as a top-level field, not a message in the
    /// list, and has no notion of a `tool` role — tool results are user
    /// messages carrying a `tool_result` content block.
    fn convert_messages(messages: &[LlmMessage]) -> Vec<AnthropicMessage> {
        let mut converted = Vec::with_capacity(messages.len());
        for msg in messages {
            let role = match msg.role {
                LlmMessageRole::System => continue,
                LlmMessageRole::User => "user",
                LlmMessageRole::Assistant => "assistant",
                LlmMessageRole::Tool => "user",
            };

            let content = if let Some(tool_call_id) = &msg.tool_call_id {
                vec![AnthropicContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: msg.content.clone(),
                }]
            } else {
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(AnthropicContentBlock::Text { text: msg.content.clone() });
                }
                if let Some(tool_calls) = &msg.tool_calls {
                    for tc in tool_calls {
                        blocks.push(AnthropicContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.arguments.clone(),
                        });
                    }
                }
                blocks
            };

            converted.push(AnthropicMessage { role: role.to_string(), content });
        }
        converted
    }

    fn convert_tools(tools: &[CapabilityDescriptor]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    }

    fn system_prompt(system: &str, messages: &[LlmMessage]) -> Option<String> {
        let mut parts = Vec::new();
        if !system.is_empty() {
            parts.push(system.to_string());
        }
        for msg in messages {
            if msg.role == LlmMessageRole::System && !msg.content.is_empty() {
                parts.push(msg.content.clone());
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

#[derive(Clone)]
enum PendingBlock {
    Text(String),
    ToolUse { id: String, name: String, json: String },
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn chat_stream(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> EngineResult<LlmChunkStream> {
        let tools = if config.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&config.tools))
        };

        let request = AnthropicRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: Self::system_prompt(system, &messages),
            messages: Self::convert_messages(&messages),
            temperature: config.temperature,
            stream: true,
            tools,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::llm(format!("failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(EngineError::llm(format!("anthropic api error ({status}): {message}")));
        }

        let model = config.model.clone();
        let blocks: Arc<Mutex<BTreeMap<usize, PendingBlock>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let usage: Arc<Mutex<Usage>> = Arc::new(Mutex::new(Usage {
            model: model.clone(),
            provider: "anthropic".to_string(),
            ..Default::default()
        }));

        let event_stream = response.bytes_stream().eventsource();
        let stream = event_stream.map(move |result| {
            let blocks = blocks.clone();
            let usage = usage.clone();

            let raw = match result {
                Err(e) => return Ok(LlmStreamEvent::Error(format!("stream error: {e}"))),
                Ok(event) => event.data,
            };

            let parsed: AnthropicStreamEvent = match serde_json::from_str(&raw) {
                Ok(e) => e,
                Err(e) => return Ok(LlmStreamEvent::Error(format!("failed to parse event: {e}"))),
            };

            match parsed {
                AnthropicStreamEvent::MessageStart { message } => {
                    if let Some(u) = message.usage {
                        let mut current = usage.lock().unwrap();
                        current.input_tokens = u.input_tokens;
                        current.cache_creation_tokens = u.cache_creation_input_tokens;
                        current.cache_read_tokens = u.cache_read_input_tokens;
                    }
                    Ok(LlmStreamEvent::TextDelta(String::new()))
                }
                AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                    let pending = match content_block {
                        AnthropicStreamContentBlock::Text { text } => PendingBlock::Text(text),
                        AnthropicStreamContentBlock::ToolUse { id, name } => {
                            PendingBlock::ToolUse { id, name, json: String::new() }
                        }
                        AnthropicStreamContentBlock::Other => PendingBlock::Text(String::new()),
                    };
                    blocks.lock().unwrap().insert(index, pending);
                    Ok(LlmStreamEvent::TextDelta(String::new()))
                }
                AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                    AnthropicStreamDelta::TextDelta { text } => {
                        if let Some(PendingBlock::Text(existing)) = blocks.lock().unwrap().get_mut(&index) {
                            existing.push_str(&text);
                        }
                        Ok(LlmStreamEvent::TextDelta(text))
                    }
                    AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                        if let Some(PendingBlock::ToolUse { json, .. }) = blocks.lock().unwrap().get_mut(&index) {
                            json.push_str(&partial_json);
                        }
                        Ok(LlmStreamEvent::TextDelta(String::new()))
                    }
                    AnthropicStreamDelta::Other => Ok(LlmStreamEvent::TextDelta(String::new())),
                },
                AnthropicStreamEvent::ContentBlockStop { .. } => Ok(LlmStreamEvent::TextDelta(String::new())),
                AnthropicStreamEvent::MessageDelta { delta, usage: delta_usage } => {
                    usage.lock().unwrap().output_tokens = delta_usage.output_tokens;
                    if delta.stop_reason.as_deref() == Some("tool_use") {
                        let pending = blocks.lock().unwrap().clone();
                        let calls: Vec<ToolCall> = pending
                            .into_values()
                            .filter_map(|block| match block {
                                PendingBlock::ToolUse { id, name, json } => Some(ToolCall {
                                    id,
                                    name,
                                    arguments: serde_json::from_str(&json).unwrap_or(json!({})),
                                }),
                                PendingBlock::Text(_) => None,
                            })
                            .collect();
                        Ok(LlmStreamEvent::ToolCalls(calls))
                    } else {
                        Ok(LlmStreamEvent::TextDelta(String::new()))
                    }
                }
                AnthropicStreamEvent::MessageStop => Ok(LlmStreamEvent::Done(usage.lock().unwrap().clone())),
                AnthropicStreamEvent::Other => Ok(LlmStreamEvent::TextDelta(String::new())),
            }
        });

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> LlmCallConfig {
        LlmCallConfig {
            model: "claude-3-5-sonnet-20241022".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(512),
            tools: vec![],
        }
    }

    #[test]
    fn convert_messages_maps_tool_result_to_user_block() {
        let messages = vec![LlmMessage::tool_result("call_1", "42")];
        let converted = AnthropicProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
        match &converted[0].content[0] {
            AnthropicContentBlock::ToolResult { tool_use_id, content } => {
                assert_eq!(tool_use_id, "call_1");
                assert_eq!(content, "42");
            }
            other => panic!("expected tool_result block, got {other:?}"),
        }
    }

    #[test]
    fn convert_messages_maps_assistant_tool_calls_to_tool_use_blocks() {
        let messages = vec![LlmMessage::assistant(
            "",
            Some(vec![ToolCall {
                id: "call_2".to_string(),
                name: "list_files".to_string(),
                arguments: json!({"path": "."}),
            }]),
        )];
        let converted = AnthropicProvider::convert_messages(&messages);
        assert_eq!(converted[0].role, "assistant");
        match &converted[0].content[0] {
            AnthropicContentBlock::ToolUse { id, name, .. } => {
                assert_eq!(id, "call_2");
                assert_eq!(name, "list_files");
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn system_prompt_combines_top_level_and_message_roles() {
        let messages = vec![LlmMessage::system("be terse"), LlmMessage::user("hi")];
        let combined = AnthropicProvider::system_prompt("you are a PO", &messages).unwrap();
        assert!(combined.contains("you are a PO"));
        assert!(combined.contains("be terse"));
    }

    #[tokio::test]
    async fn chat_stream_emits_text_then_done_with_usage() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12,\"output_tokens\":0}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider =
            AnthropicProvider::with_base_url("test-key", format!("{}/v1/messages", server.uri()));

        let messages = vec![LlmMessage::user("hello")];
        let mut stream = provider
            .chat_stream("you are helpful", messages, &config())
            .await
            .expect("request succeeds");

        let mut saw_text = false;
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.expect("ok") {
                LlmStreamEvent::TextDelta(ref s) if s == "hi" => saw_text = true,
                LlmStreamEvent::Done(usage) => {
                    assert_eq!(usage.input_tokens, 12);
                    assert_eq!(usage.output_tokens, 3);
                    saw_done = true;
                }
                _ => {}
            }
        }
        assert!(saw_text, "expected a text delta carrying \"hi\"");
        assert!(saw_done, "expected a Done event carrying usage");
    }
}
