// Integration test for the po-server REST surface.
// Boots a real in-process Environment (in-memory sqlite store, a stub LLM
// provider that never makes a network call), serves it on a real TCP
// listener, and drives it with reqwest — following the "spin up the
// server, hit it with reqwest::Client, assert on JSON" integration style
// from everruns-api/tests/integration_test.rs, but self-contained rather
// than `#[ignore]`d against a manually-started server since nothing here
// needs real network access.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use po_core::bus::MessageBus;
use po_core::llm::{LlmCallConfig, LlmChunkStream, LlmMessage, LlmProvider, LlmRegistry, LlmStreamEvent};
use po_core::message::Usage;
use po_server::state::AppState;
use serde_json::Value;

struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    fn provider_name(&self) -> &str {
        "stub"
    }

    async fn chat_stream(
        &self,
        _system: &str,
        _messages: Vec<LlmMessage>,
        _config: &LlmCallConfig,
    ) -> po_core::error::EngineResult<LlmChunkStream> {
        let events = vec![
            Ok(LlmStreamEvent::TextDelta("hello from a test double".to_string())),
            Ok(LlmStreamEvent::Done(Usage::default())),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

async fn spawn_test_server() -> (String, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create temp env dir");
    std::fs::create_dir_all(tmp.path().join(po_core::loader::OBJECTS_DIR)).unwrap();
    std::fs::create_dir_all(tmp.path().join(po_core::loader::PRIMITIVES_DIR)).unwrap();

    let greeter = po_core::config::PromptObjectFile {
        config: po_core::config::PromptObjectConfig::new("greeter"),
        body: "Say hello.".to_string(),
    };
    let rendered = po_core::loader::render_po_file(&greeter).unwrap();
    std::fs::write(po_core::loader::po_file_path(tmp.path(), "greeter"), rendered).unwrap();

    let store = po_storage::SqliteThreadStore::open_in_memory().await.unwrap();
    let bus = Arc::new(MessageBus::new());
    let llm = LlmRegistry::new("stub", Arc::new(StubProvider));

    let (env, _report) = po_engine::build_environment(tmp.path().to_path_buf(), store, bus, llm, "stub-model")
        .await
        .expect("boot environment");
    let runner = Arc::new(po_engine::Runner::new());
    let state = AppState::new(env, runner);

    let app = po_server::rest::routes(state.clone()).merge(po_server::ws::routes(state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), tmp)
}

#[tokio::test]
async fn lists_prompt_objects_and_environment_info() {
    let (base_url, _tmp) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let pos: Value = client
        .get(format!("{base_url}/v1/prompt-objects"))
        .send()
        .await
        .expect("request prompt objects")
        .json()
        .await
        .expect("parse prompt objects");
    let pos = pos.as_array().expect("array response");
    assert_eq!(pos.len(), 1);
    assert_eq!(pos[0]["name"], "greeter");

    let env_info: Value = client
        .get(format!("{base_url}/v1/environment"))
        .send()
        .await
        .expect("request environment info")
        .json()
        .await
        .expect("parse environment info");
    assert_eq!(env_info["prompt_object_count"], 1);
    assert_eq!(env_info["default_model"], "stub-model");
    assert_eq!(env_info["active_runs"], 0);
}

#[tokio::test]
async fn unknown_prompt_object_returns_404_with_a_plain_message() {
    let (base_url, _tmp) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/v1/prompt-objects/does-not-exist"))
        .send()
        .await
        .expect("request missing prompt object");
    assert_eq!(response.status(), 404);

    let body: Value = response.json().await.expect("parse error body");
    assert!(body["error"].as_str().is_some(), "error body should carry a plain message");
}

#[tokio::test]
async fn unknown_session_returns_404() {
    let (base_url, _tmp) = spawn_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/v1/sessions/{}", uuid::Uuid::now_v7()))
        .send()
        .await
        .expect("request missing session");
    assert_eq!(response.status(), 404);
}
