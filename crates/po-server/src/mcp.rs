// MCP stdio transport (spec §6 "MCP stdio JSON-RPC"): a line-delimited
// JSON-RPC 2.0 loop over stdin/stdout exposing prompt objects as tools and
// resources. Sessions created through this transport are tagged
// `source=mcp` the same way the WS/REST surfaces tag `web`/`api`.
//
// Grounded on everruns-api's `Json<T>` request/response shape — there is
// no stdio transport anywhere upstream, so the read-a-line/dispatch/
// write-a-line loop is new, built on the same serde_json plumbing.

use std::io::Write;
use std::sync::Arc;

use po_core::capability::CapabilityKind;
use po_core::environment::Environment;
use po_core::prompt_object::PromptObjectCapability;
use po_core::session::Source;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

fn ok_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

const TOOLS: &[(&str, &str)] = &[
    ("list_prompt_objects", "List every registered prompt object"),
    ("send_message", "Send a message to a prompt object and await its reply"),
    ("get_conversation", "Fetch this transport's conversation history with a prompt object"),
    ("inspect_po", "Fetch a prompt object's description, capabilities, and body"),
    ("get_pending_requests", "List pending ask_human requests, optionally scoped to one PO"),
    ("respond_to_request", "Answer a pending ask_human request"),
];

pub async fn serve_stdio(env: Arc<Environment>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let stdout = std::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&env, &line).await;
        let mut out = stdout.lock();
        writeln!(out, "{}", serde_json::to_string(&response)?)?;
        out.flush()?;
    }
    Ok(())
}

async fn handle_line(env: &Arc<Environment>, line: &str) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return error_response(Value::Null, PARSE_ERROR, format!("invalid JSON: {e}")),
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "initialize" => ok_response(
            id,
            json!({ "protocolVersion": "2024-11-05", "serverInfo": { "name": "promptobjects", "version": env!("CARGO_PKG_VERSION") } }),
        ),
        "tools/list" => ok_response(
            id,
            json!({
                "tools": TOOLS.iter().map(|(name, description)| json!({ "name": name, "description": description })).collect::<Vec<_>>()
            }),
        ),
        "tools/call" => handle_tool_call(env, id, params).await,
        "resources/list" => ok_response(id, json!({ "resources": list_resources(env) })),
        "resources/read" => handle_resource_read(env, id, params).await,
        _ => error_response(id, METHOD_NOT_FOUND, format!("unknown method: {method}")),
    }
}

fn list_resources(env: &Arc<Environment>) -> Vec<Value> {
    let mut resources = vec![json!({ "uri": "bus://messages", "name": "Recent bus traffic" })];
    for po in env.registry.list(Some(CapabilityKind::PromptObject)) {
        let name = po.name();
        resources.push(json!({ "uri": format!("po://{name}/conversation"), "name": format!("{name} conversation") }));
        resources.push(json!({ "uri": format!("po://{name}/config"), "name": format!("{name} config") }));
        resources.push(json!({ "uri": format!("po://{name}/prompt"), "name": format!("{name} prompt body") }));
    }
    resources
}

async fn handle_tool_call(env: &Arc<Environment>, id: Value, params: Value) -> Value {
    let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
        return error_response(id, INVALID_PARAMS, "missing tool name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let result = match name {
        "list_prompt_objects" => Ok(list_prompt_objects(env)),
        "send_message" => send_message(env, &arguments).await,
        "get_conversation" => get_conversation(env, &arguments).await,
        "inspect_po" => inspect_po(env, &arguments),
        "get_pending_requests" => Ok(get_pending_requests(env, &arguments)),
        "respond_to_request" => respond_to_request(env, &arguments),
        other => return error_response(id, METHOD_NOT_FOUND, format!("unknown tool: {other}")),
    };

    match result {
        Ok(value) => ok_response(id, json!({ "content": [{ "type": "text", "text": value.to_string() }] })),
        Err(e) => error_response(id, INTERNAL_ERROR, e.user_message()),
    }
}

fn list_prompt_objects(env: &Arc<Environment>) -> Value {
    let names: Vec<String> = env
        .registry
        .list(Some(CapabilityKind::PromptObject))
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    json!(names)
}

async fn send_message(env: &Arc<Environment>, arguments: &Value) -> po_core::error::EngineResult<Value> {
    let po_name = arguments
        .get("po_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| po_core::error::EngineError::config("send_message requires po_name"))?;
    let message = arguments
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or_else(|| po_core::error::EngineError::config("send_message requires message"))?;
    let session = env.store.get_or_create_session(po_name, Source::Mcp).await?;
    let reply = env
        .send_message(po_name, json!(message), Some(session.id), Source::Mcp)
        .await?;
    Ok(json!({ "session_id": session.id, "reply": reply }))
}

async fn get_conversation(env: &Arc<Environment>, arguments: &Value) -> po_core::error::EngineResult<Value> {
    let po_name = arguments
        .get("po_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| po_core::error::EngineError::config("get_conversation requires po_name"))?;
    let limit = arguments.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
    let session = env.store.get_or_create_session(po_name, Source::Mcp).await?;
    let mut messages = env.store.get_messages(session.id).await?;
    if let Some(limit) = limit {
        if messages.len() > limit {
            messages = messages.split_off(messages.len() - limit);
        }
    }
    Ok(json!({ "session_id": session.id, "messages": messages }))
}

fn inspect_po(env: &Arc<Environment>, arguments: &Value) -> po_core::error::EngineResult<Value> {
    let po_name = arguments
        .get("po_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| po_core::error::EngineError::config("inspect_po requires po_name"))?;
    let capability = env
        .registry
        .get(po_name)
        .ok_or_else(|| po_core::error::EngineError::PromptObjectNotFound(po_name.to_string()))?;
    let po = capability
        .as_any()
        .downcast_ref::<PromptObjectCapability>()
        .ok_or_else(|| po_core::error::EngineError::config(format!("'{po_name}' is not a prompt object")))?;
    let config = po.config();
    Ok(json!({
        "name": config.name,
        "description": config.description,
        "capabilities": config.capabilities,
        "body": po.body(),
    }))
}

fn get_pending_requests(env: &Arc<Environment>, arguments: &Value) -> Value {
    let po_name = arguments.get("po_name").and_then(|v| v.as_str());
    json!(env.human_queue.pending(po_name))
}

fn respond_to_request(env: &Arc<Environment>, arguments: &Value) -> po_core::error::EngineResult<Value> {
    let request_id = arguments
        .get("request_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| po_core::error::EngineError::config("respond_to_request requires a valid request_id"))?;
    let response = arguments
        .get("response")
        .and_then(|v| v.as_str())
        .ok_or_else(|| po_core::error::EngineError::config("respond_to_request requires response"))?;
    env.human_queue.respond(request_id, response)?;
    Ok(json!({ "ok": true }))
}

async fn handle_resource_read(env: &Arc<Environment>, id: Value, params: Value) -> Value {
    let Some(uri) = params.get("uri").and_then(|u| u.as_str()) else {
        return error_response(id, INVALID_PARAMS, "missing uri");
    };

    let result = read_resource(env, uri).await;
    match result {
        Ok(text) => ok_response(id, json!({ "contents": [{ "uri": uri, "text": text }] })),
        Err(e) => error_response(id, INTERNAL_ERROR, e.user_message()),
    }
}

async fn read_resource(env: &Arc<Environment>, uri: &str) -> po_core::error::EngineResult<String> {
    if uri == "bus://messages" {
        let events = env.bus.events_since(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
        return Ok(serde_json::to_string(&events).unwrap_or_default());
    }

    let Some(rest) = uri.strip_prefix("po://") else {
        return Err(po_core::error::EngineError::config(format!("unrecognized resource uri: {uri}")));
    };
    let mut parts = rest.splitn(2, '/');
    let po_name = parts.next().unwrap_or_default();
    let kind = parts.next().unwrap_or_default();

    let capability = env
        .registry
        .get(po_name)
        .ok_or_else(|| po_core::error::EngineError::PromptObjectNotFound(po_name.to_string()))?;
    let po = capability
        .as_any()
        .downcast_ref::<PromptObjectCapability>()
        .ok_or_else(|| po_core::error::EngineError::config(format!("'{po_name}' is not a prompt object")))?;

    match kind {
        "config" => Ok(serde_json::to_string(&po.config()).unwrap_or_default()),
        "prompt" => Ok(po.body()),
        "conversation" => {
            let session = env.store.get_or_create_session(po_name, Source::Mcp).await?;
            let messages = env.store.get_messages(session.id).await?;
            Ok(serde_json::to_string(&messages).unwrap_or_default())
        }
        other => Err(po_core::error::EngineError::config(format!("unrecognized resource kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_carries_the_request_id() {
        let response = ok_response(json!(7), json!({ "ok": true }));
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["result"]["ok"], json!(true));
        assert!(response.get("error").is_none());
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let response = error_response(json!(1), METHOD_NOT_FOUND, "unknown tool: bogus");
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
        assert_eq!(response["error"]["message"], json!("unknown tool: bogus"));
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let env = test_environment().await;
        let response = handle_line(&env, r#"{"jsonrpc":"2.0","id":1,"method":"bogus"}"#).await;
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn tools_list_advertises_every_tool() {
        let env = test_environment().await;
        let response = handle_line(&env, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), TOOLS.len());
    }

    #[tokio::test]
    async fn list_prompt_objects_tool_reports_registered_pos() {
        let env = test_environment().await;
        let response = handle_line(
            &env,
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"list_prompt_objects"}}"#,
        )
        .await;
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("greeter"));
    }

    async fn test_environment() -> Arc<Environment> {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(po_core::loader::OBJECTS_DIR)).unwrap();
        std::fs::create_dir_all(tmp.path().join(po_core::loader::PRIMITIVES_DIR)).unwrap();

        let greeter = po_core::config::PromptObjectFile {
            config: po_core::config::PromptObjectConfig::new("greeter"),
            body: "Say hello.".to_string(),
        };
        let rendered = po_core::loader::render_po_file(&greeter).unwrap();
        std::fs::write(po_core::loader::po_file_path(tmp.path(), "greeter"), rendered).unwrap();

        let store = po_storage::SqliteThreadStore::open_in_memory().await.unwrap();
        let bus = Arc::new(po_core::bus::MessageBus::new());
        let llm = po_core::llm::LlmRegistry::new("stub", Arc::new(NoopProvider));

        let (env, _report) =
            po_engine::build_environment(tmp.path().to_path_buf(), store, bus, llm, "stub-model")
                .await
                .unwrap();
        env
    }

    struct NoopProvider;

    #[async_trait::async_trait]
    impl po_core::llm::LlmProvider for NoopProvider {
        fn provider_name(&self) -> &str {
            "noop"
        }

        async fn chat_stream(
            &self,
            _system: &str,
            _messages: Vec<po_core::llm::LlmMessage>,
            _config: &po_core::llm::LlmCallConfig,
        ) -> po_core::error::EngineResult<po_core::llm::LlmChunkStream> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(po_core::llm::LlmStreamEvent::Done(
                po_core::message::Usage::default(),
            ))])))
        }
    }
}
