// PO Engine turn loop (spec §4.3)
//
// Grounded on `everruns-core::loop::AgentLoop::run_turn`'s iterate-until-
// no-tool-calls structure, generalized to (a) resolve every tool target
// through the `Registry` instead of a fixed tool list, (b) branch on
// Primitive/PromptObject/Universal instead of calling one `ToolExecutor`,
// and (c) support delegation (spawn a nested turn) and ask_human
// suspension (modeled as a plain `.await` inside the universal handler,
// not as special dispatcher-level control flow — see `universal::ask_human`).

use uuid::Uuid;

use crate::bus::PoStatus;
use crate::capability::{extract_message, CapabilityKind, CapabilityOutput};
use crate::error::{EngineError, EngineResult};
use crate::llm::{LlmCallConfig, LlmMessage, LlmStreamEvent};
use crate::message::{Message, ToolCall, ToolResultEntry, Usage};
use crate::session::Session;
use crate::turn::{DelegationCaller, TurnContext};

/// The minimal view of a PO the dispatcher needs — kept separate from
/// `PromptObjectCapability` so the turn loop has no dependency on how a PO
/// is loaded or stored.
pub struct PoHandle<'a> {
    pub name: &'a str,
    pub body: &'a str,
    pub capabilities: &'a [String],
}

fn classify(error: &EngineError) -> &'static str {
    match error {
        EngineError::Config(_) => "ConfigError",
        EngineError::Resolution(_) => "ResolutionError",
        EngineError::Capability { .. } => "CapabilityError",
        EngineError::Llm(_) => "LLMError",
        EngineError::Store(_) => "StoreError",
        EngineError::HumanCancelled(_) => "HumanCancelled",
        EngineError::Cancelled => "Cancelled",
        EngineError::MaxIterationsReached(_) => "MaxIterationsReached",
        EngineError::SessionNotFound(_) => "ResolutionError",
        EngineError::PromptObjectNotFound(_) => "ResolutionError",
        EngineError::AlreadyResolved(_) => "ResolutionError",
        EngineError::Internal(_) => "Internal",
    }
}

fn history_to_llm_messages(history: &[Message]) -> Vec<LlmMessage> {
    let mut out = Vec::with_capacity(history.len());
    for msg in history {
        match msg.role {
            crate::message::MessageRole::User => {
                out.push(LlmMessage::user(msg.content.clone().unwrap_or_default()));
            }
            crate::message::MessageRole::Assistant => {
                out.push(LlmMessage::assistant(
                    msg.content.clone().unwrap_or_default(),
                    msg.tool_calls.clone(),
                ));
            }
            crate::message::MessageRole::Tool => {
                for result in msg.tool_results.iter().flatten() {
                    out.push(LlmMessage::tool_result(
                        result.tool_call_id.clone(),
                        result.content.clone(),
                    ));
                }
            }
        }
    }
    out
}

/// Resolve or create the session this turn runs in (spec §4.3 step 1),
/// then append the incoming message (step 2).
async fn resolve_session_and_append(
    handle: &PoHandle<'_>,
    arguments: &serde_json::Value,
    ctx: &TurnContext,
) -> EngineResult<Session> {
    let store = &ctx.env.store;

    let session = if let Some(id) = ctx.session_id {
        store
            .get_session(id)
            .await?
            .ok_or(EngineError::SessionNotFound(id))?
    } else if let Some(caller) = &ctx.caller {
        store
            .create_session(Session::new_delegation(
                handle.name,
                caller.session_id,
                caller.po_name.clone(),
                caller.message_id,
                ctx.source,
            ))
            .await?
    } else {
        store.get_or_create_session(handle.name, ctx.source).await?
    };

    let content = extract_message(arguments);
    let user_message = match &ctx.caller {
        Some(caller) => {
            Message::delegated_user(session.id, content, caller.po_name.clone(), ctx.source)
        }
        None => Message::user(session.id, content, ctx.source),
    };
    store.add_message(user_message).await?;

    Ok(session)
}

/// Run `handle`'s full turn loop in `ctx`, returning the final assistant
/// text content (spec §4.3).
pub async fn run_turn(
    handle: PoHandle<'_>,
    arguments: serde_json::Value,
    ctx: TurnContext,
    max_iterations: Option<usize>,
) -> EngineResult<CapabilityOutput> {
    let env = ctx.env.clone();
    let session = resolve_session_and_append(&handle, &arguments, &ctx).await?;
    let ctx = ctx.for_same_session(session.id, handle.name);

    let mut iteration: usize = 0;
    loop {
        if ctx.cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        iteration += 1;
        if let Some(max) = max_iterations {
            if iteration > max {
                return Err(EngineError::MaxIterationsReached(max));
            }
        }

        // (a) Assemble the LLM request.
        let history = env.store.get_messages(session.id).await?;
        let llm_messages = history_to_llm_messages(&history);

        let mut tool_names: Vec<String> = handle.capabilities.to_vec();
        for universal in env.registry.list(Some(CapabilityKind::Universal)) {
            if !tool_names.iter().any(|n| n == universal.name()) {
                tool_names.push(universal.name().to_string());
            }
        }
        let tools = env.registry.descriptors_for(&tool_names);

        // (b)
        env.bus.notify_po_state(handle.name, PoStatus::Thinking);

        // (c) streaming LLM call; forward chunks to the bus as they arrive.
        let call_config = LlmCallConfig {
            model: env.default_model.clone(),
            temperature: None,
            max_tokens: None,
            tools,
        };
        let provider = env.llm.resolve(None)?;
        let mut stream = provider
            .chat_stream(handle.body, llm_messages, &call_config)
            .await?;

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = Usage {
            model: call_config.model.clone(),
            provider: provider.provider_name().to_string(),
            ..Default::default()
        };
        {
            use futures::StreamExt;
            while let Some(event) = stream.next().await {
                match event? {
                    LlmStreamEvent::TextDelta(delta) => {
                        env.bus
                            .notify_stream_chunk(session.id, handle.name, &delta);
                        content.push_str(&delta);
                    }
                    LlmStreamEvent::ToolCalls(calls) => tool_calls = calls,
                    LlmStreamEvent::Done(final_usage) => usage = final_usage,
                    LlmStreamEvent::Error(err) => return Err(EngineError::llm(err)),
                }
            }
        }
        env.bus.notify_stream_end(session.id, handle.name);

        // (d)
        env.bus.notify_po_state(
            handle.name,
            if tool_calls.is_empty() {
                PoStatus::Idle
            } else {
                PoStatus::CallingTool
            },
        );

        // (e)
        let assistant_content = if content.is_empty() { None } else { Some(content) };
        let assistant_message = Message::assistant(
            session.id,
            assistant_content.clone(),
            if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls.clone())
            },
            Some(usage),
            ctx.source,
        );
        let assistant_message_id = assistant_message.id;
        env.store.add_message(assistant_message).await?;

        // (f)
        if tool_calls.is_empty() {
            return Ok(CapabilityOutput::text(assistant_content.unwrap_or_default()));
        }

        // (g) dispatch each tool call in emission order.
        let mut tool_results = Vec::with_capacity(tool_calls.len());
        let mut cancelled_mid_loop = false;

        for tc in &tool_calls {
            if ctx.cancellation.is_cancelled() {
                cancelled_mid_loop = true;
            }
            if cancelled_mid_loop {
                tool_results.push(ToolResultEntry {
                    tool_call_id: tc.id.clone(),
                    name: tc.name.clone(),
                    content: "cancelled".to_string(),
                });
                continue;
            }

            let Some(capability) = env.registry.get(&tc.name) else {
                tool_results.push(ToolResultEntry {
                    tool_call_id: tc.id.clone(),
                    name: tc.name.clone(),
                    content: format!("error (ResolutionError): unknown capability: {}", tc.name),
                });
                continue;
            };

            env.bus.publish(
                handle.name,
                &tc.name,
                serde_json::to_string(&tc.arguments).unwrap_or_default(),
                Some(session.id),
            );

            let sub_ctx = if capability.kind() == CapabilityKind::PromptObject {
                ctx.for_delegation(DelegationCaller {
                    po_name: handle.name.to_string(),
                    session_id: session.id,
                    message_id: assistant_message_id,
                })
            } else {
                ctx.clone()
            };

            let content = match capability.receive(tc.arguments.clone(), sub_ctx).await {
                Ok(out) => out.content,
                Err(EngineError::Cancelled) => {
                    cancelled_mid_loop = true;
                    "cancelled".to_string()
                }
                Err(e) => format!("error ({}): {}", classify(&e), e.user_message()),
            };

            env.bus.publish(
                &tc.name,
                handle.name,
                content.clone(),
                Some(session.id),
            );

            tool_results.push(ToolResultEntry {
                tool_call_id: tc.id.clone(),
                name: tc.name.clone(),
                content,
            });
        }

        // (h)
        env.store
            .add_message(Message::tool(session.id, tool_results, ctx.source))
            .await?;

        if cancelled_mid_loop {
            return Err(EngineError::Cancelled);
        }

        // (i) repeat from (a).
    }
}
