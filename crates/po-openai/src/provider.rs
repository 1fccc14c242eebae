// `po_core::llm::LlmProvider` implementation for the OpenAI Chat
// Completions streaming API, grounded on
// `everruns-core::openai::OpenAIProtocolLlmProvider`'s request-building and
// SSE-accumulation shape, retargeted at `po-core`'s own message/tool-call
// vocabulary instead of `everruns-contracts`'s types.

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
    OpenAiDelta, OpenAiErrorBody, OpenAiFunction, OpenAiFunctionCall, OpenAiMessage, OpenAiRequest,
    OpenAiStreamChunk, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Reads `OPENAI_API_KEY` (spec §6 "Environment variables").
    pub fn from_env() -> EngineResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::config("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    fn convert_role(role: LlmMessageRole) -> &'static str {
        match role {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
            LlmMessageRole::Tool => "tool",
        }
    }

    fn convert_message(msg: &LlmMessage) -> OpenAiMessage {
        OpenAiMessage {
            role: Self::convert_role(msg.role).to_string(),
            content: if msg.content.is_empty() { None } else { Some(msg.content.clone()) },
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| OpenAiToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: tc.name.clone(),
                            arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tools(tools: &[CapabilityDescriptor]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }
}

/// Tool-call arguments arrive as incrementally-appended string fragments
/// keyed by index; only parsed to JSON once the stream says the call is
/// complete.
#[derive(Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn chat_stream(
        &self,
        system: &str,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> EngineResult<LlmChunkStream> {
        let mut openai_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            openai_messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        openai_messages.extend(messages.iter().map(Self::convert_message));

        let tools = if config.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&config.tools))
        };

        let request = OpenAiRequest {
            model: config.model.clone(),
            messages: openai_messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
            stream_options: OpenAiStreamOptions { include_usage: true },
            tools,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::llm(format!("failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(EngineError::llm(format!("openai api error ({status}): {message}")));
        }

        let model = config.model.clone();
        let accumulated_tool_calls: Arc<Mutex<Vec<PendingToolCall>>> = Arc::new(Mutex::new(Vec::new()));
        let last_usage: Arc<Mutex<Option<Usage>>> = Arc::new(Mutex::new(None));

        let event_stream = response.bytes_stream().eventsource();
        let stream = event_stream.map(move |result| {
            let model = model.clone();
            let accumulated_tool_calls = accumulated_tool_calls.clone();
            let last_usage = last_usage.clone();

            match result {
                Err(e) => Ok(LlmStreamEvent::Error(format!("stream error: {e}"))),
                Ok(event) => {
                    if event.data == "[DONE]" {
                        let usage = last_usage.lock().unwrap().clone().unwrap_or(Usage {
                            model,
                            provider: "openai".to_string(),
                            ..Default::default()
                        });
                        return Ok(LlmStreamEvent::Done(usage));
                    }

                    let chunk: OpenAiStreamChunk = match serde_json::from_str(&event.data) {
                        Ok(c) => c,
                        Err(e) => return Ok(LlmStreamEvent::Error(format!("failed to parse chunk: {e}"))),
                    };

                    if let Some(usage) = chunk.usage {
                        *last_usage.lock().unwrap() = Some(Usage {
                            input_tokens: usage.prompt_tokens,
                            output_tokens: usage.completion_tokens,
                            cache_creation_tokens: None,
                            cache_read_tokens: usage
                                .prompt_tokens_details
                                .map(|d| d.cached_tokens)
                                .filter(|&n| n > 0),
                            model: model.clone(),
                            provider: "openai".to_string(),
                        });
                    }

                    let Some(choice) = chunk.choices.first() else {
                        return Ok(LlmStreamEvent::TextDelta(String::new()));
                    };

                    let OpenAiDelta { content, tool_calls } = &choice.delta;

                    if let Some(deltas) = tool_calls {
                        let mut acc = accumulated_tool_calls.lock().unwrap();
                        for delta in deltas {
                            let idx = delta.index as usize;
                            while acc.len() <= idx {
                                acc.push(PendingToolCall::default());
                            }
                            if let Some(id) = &delta.id {
                                acc[idx].id = id.clone();
                            }
                            if let Some(function) = &delta.function {
                                if let Some(name) = &function.name {
                                    acc[idx].name = name.clone();
                                }
                                if let Some(args) = &function.arguments {
                                    acc[idx].arguments.push_str(args);
                                }
                            }
                        }
                        return Ok(LlmStreamEvent::TextDelta(String::new()));
                    }

                    if let Some(content) = content {
                        return Ok(LlmStreamEvent::TextDelta(content.clone()));
                    }

                    if let Some(finish_reason) = &choice.finish_reason {
                        if finish_reason == "tool_calls" {
                            let pending = accumulated_tool_calls.lock().unwrap().clone();
                            let calls: Vec<ToolCall> = pending
                                .into_iter()
                                .map(|tc| ToolCall {
                                    id: tc.id,
                                    name: tc.name,
                                    arguments: serde_json::from_str(&tc.arguments).unwrap_or(json!({})),
                                })
                                .collect();
                            return Ok(LlmStreamEvent::ToolCalls(calls));
                        }
                        let usage = last_usage.lock().unwrap().clone().unwrap_or(Usage {
                            model,
                            provider: "openai".to_string(),
                            ..Default::default()
                        });
                        return Ok(LlmStreamEvent::Done(usage));
                    }

                    Ok(LlmStreamEvent::TextDelta(String::new()))
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
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

    fn config(tools: Vec<CapabilityDescriptor>) -> LlmCallConfig {
        LlmCallConfig {
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(256),
            tools,
        }
    }

    #[test]
    fn convert_message_round_trips_tool_calls() {
        let msg = LlmMessage::assistant(
            "",
            Some(vec![ToolCall {
                id: "call_1".to_string(),
                name: "read_file".to_string(),
                arguments: json!({"path": "a.txt"}),
            }]),
        );
        let converted = OpenAiProvider::convert_message(&msg);
        assert_eq!(converted.role, "assistant");
        assert!(converted.content.is_none());
        let tool_calls = converted.tool_calls.expect("tool calls preserved");
        assert_eq!(tool_calls[0].id, "call_1");
        assert_eq!(tool_calls[0].function.name, "read_file");
        assert_eq!(tool_calls[0].function.arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn convert_tools_maps_capability_descriptors() {
        let descriptor = CapabilityDescriptor {
            name: "read_file".to_string(),
            description: "reads a file".to_string(),
            parameters: json!({"type": "object"}),
            kind: po_core::capability::CapabilityKind::Primitive,
        };
        let tools = OpenAiProvider::convert_tools(&[descriptor]);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "read_file");
        assert_eq!(tools[0].r#type, "function");
    }

    #[tokio::test]
    async fn chat_stream_emits_text_delta_then_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],",
            "\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = OpenAiProvider::with_base_url(
            "test-key",
            format!("{}/chat/completions", server.uri()),
        );

        let messages = vec![LlmMessage::user("hello")];
        let mut stream = provider
            .chat_stream("you are helpful", messages, &config(vec![]))
            .await
            .expect("request succeeds");

        let first = stream.next().await.expect("first event").expect("ok");
        assert!(matches!(first, LlmStreamEvent::TextDelta(ref s) if s == "hi"));

        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            if let Ok(LlmStreamEvent::Done(usage)) = event {
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 2);
                saw_done = true;
            }
        }
        assert!(saw_done, "expected a Done event carrying usage");
    }
}
