// Dynamic primitive compiler (spec §4.4 `create_primitive`/`modify_primitive`,
// §4.2 "runtime-authored primitives").
//
// `rhai` is the idiomatic Rust answer to "compile and invoke
// untrusted/author-defined code at runtime without shelling out to rustc"
// (see root DESIGN.md): pure-Rust, sandboxed by default (no filesystem or
// process access unless explicitly registered on the `Engine`), and cheap
// to embed. A primitive's source must define a `receive(message, context)`
// function (spec §6 "Primitive source format"); `name`/`description`/
// `parameters` are supplied by the calling universal capability rather than
// read back out of the script, since `create_primitive`'s own arguments
// already carry them.

use std::sync::Arc;

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope, AST};

use po_core::capability::{Capability, CapabilityKind, CapabilityOutput};
use po_core::error::{EngineError, EngineResult};
use po_core::primitive::PrimitiveCompiler;
use po_core::turn::TurnContext;

/// Builds a sandboxed engine: no extra modules, operation/depth limits to
/// keep a misbehaving primitive from hanging a turn indefinitely.
fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(10_000_000);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_string_size(1_000_000);
    engine.set_max_array_size(10_000);
    engine
}

pub struct RhaiPrimitiveCompiler {
    engine: Engine,
}

impl Default for RhaiPrimitiveCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiPrimitiveCompiler {
    pub fn new() -> Self {
        Self {
            engine: sandboxed_engine(),
        }
    }

    fn compile_ast(&self, source: &str) -> EngineResult<AST> {
        self.engine
            .compile(source)
            .map_err(|e| EngineError::capability("primitive_compiler", format!("compile error: {e}")))
    }

    fn require_receive_fn(ast: &AST) -> EngineResult<()> {
        if ast.iter_functions().any(|f| f.name == "receive" && f.params.len() == 2) {
            Ok(())
        } else {
            Err(EngineError::capability(
                "primitive_compiler",
                "primitive source must define receive(message, context)",
            ))
        }
    }
}

#[async_trait]
impl PrimitiveCompiler for RhaiPrimitiveCompiler {
    async fn verify(&self, source: &str) -> EngineResult<()> {
        let ast = self.compile_ast(source)?;
        Self::require_receive_fn(&ast)
    }

    async fn compile(
        &self,
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        source: &str,
    ) -> EngineResult<Arc<dyn Capability>> {
        let ast = self.compile_ast(source)?;
        Self::require_receive_fn(&ast)?;

        Ok(Arc::new(RhaiCapability {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            engine: self.engine.clone(),
            ast: Arc::new(ast),
        }))
    }
}

/// A capability backed by a compiled `rhai` script. Evaluation runs on a
/// blocking thread — `rhai` execution is synchronous CPU work, and a
/// primitive author has no business blocking the async runtime (spec §5
/// "every primitive that performs I/O" is a suspension point; a script
/// primitive is modeled the same way).
struct RhaiCapability {
    name: String,
    description: String,
    parameters: serde_json::Value,
    engine: Engine,
    ast: Arc<AST>,
}

#[async_trait]
impl Capability for RhaiCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Primitive
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(
        &self,
        arguments: serde_json::Value,
        ctx: TurnContext,
    ) -> EngineResult<CapabilityOutput> {
        let engine = self.engine.clone();
        let ast = self.ast.clone();
        let primitive_name = self.name.clone();

        let message: Dynamic = rhai::serde::to_dynamic(&arguments)
            .map_err(|e| EngineError::capability(&primitive_name, format!("argument conversion: {e}")))?;
        let context: Dynamic = rhai::serde::to_dynamic(serde_json::json!({
            "session_id": ctx.session_id.map(|id| id.to_string()),
            "calling_po": ctx.calling_po,
            "source": ctx.source.to_string(),
        }))
        .map_err(|e| EngineError::capability(&primitive_name, format!("context conversion: {e}")))?;

        let result = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            engine.call_fn::<Dynamic>(&mut scope, &ast, "receive", (message, context))
        })
        .await
        .map_err(|e| EngineError::capability(&primitive_name, format!("primitive task panicked: {e}")))?
        .map_err(|e| EngineError::capability(&primitive_name, e.to_string()))?;

        let content = if let Some(s) = result.clone().try_cast::<String>() {
            s
        } else {
            let value: serde_json::Value = rhai::serde::from_dynamic(&result)
                .map_err(|e| EngineError::capability(&primitive_name, format!("return conversion: {e}")))?;
            serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string())
        };

        Ok(CapabilityOutput::text(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use po_core::environment::Environment;
    use po_core::llm::{LlmCallConfig, LlmChunkStream, LlmMessage, LlmProvider, LlmRegistry};
    use po_core::session::Source;
    use std::sync::Arc as StdArc;

    struct UnusedProvider;

    #[async_trait]
    impl LlmProvider for UnusedProvider {
        fn provider_name(&self) -> &str {
            "unused"
        }
        async fn chat_stream(
            &self,
            _system: &str,
            _messages: Vec<LlmMessage>,
            _config: &LlmCallConfig,
        ) -> EngineResult<LlmChunkStream> {
            unimplemented!()
        }
    }

    struct NullStore;

    #[async_trait]
    impl po_core::store::ThreadStore for NullStore {
        async fn create_session(&self, s: po_core::session::Session) -> EngineResult<po_core::session::Session> {
            Ok(s)
        }
        async fn get_session(&self, _id: uuid::Uuid) -> EngineResult<Option<po_core::session::Session>> {
            Ok(None)
        }
        async fn get_or_create_session(
            &self,
            po_name: &str,
            source: Source,
        ) -> EngineResult<po_core::session::Session> {
            Ok(po_core::session::Session::new_root(po_name, source))
        }
        async fn update_session(&self, _id: uuid::Uuid, _update: po_core::store::SessionUpdate) -> EngineResult<()> {
            Ok(())
        }
        async fn delete_session(&self, _id: uuid::Uuid) -> EngineResult<()> {
            Ok(())
        }
        async fn list_sessions(
            &self,
            _po_name: Option<&str>,
            _source: Option<Source>,
        ) -> EngineResult<Vec<po_core::session::Session>> {
            Ok(Vec::new())
        }
        async fn list_all_sessions(&self, _source: Option<Source>) -> EngineResult<Vec<po_core::session::Session>> {
            Ok(Vec::new())
        }
        async fn count_sessions(&self) -> EngineResult<i64> {
            Ok(0)
        }
        async fn add_message(&self, m: po_core::message::Message) -> EngineResult<uuid::Uuid> {
            Ok(m.id)
        }
        async fn get_messages(&self, _session_id: uuid::Uuid) -> EngineResult<Vec<po_core::message::Message>> {
            Ok(Vec::new())
        }
        async fn clear_messages(&self, _session_id: uuid::Uuid) -> EngineResult<()> {
            Ok(())
        }
        async fn count_messages(&self, _session_id: uuid::Uuid) -> EngineResult<i64> {
            Ok(0)
        }
        async fn get_thread_tree(
            &self,
            _session_id: uuid::Uuid,
            _include_messages: bool,
        ) -> EngineResult<po_core::store::ThreadTree> {
            unimplemented!()
        }
        async fn get_thread_lineage(&self, _session_id: uuid::Uuid) -> EngineResult<Vec<po_core::session::Session>> {
            Ok(Vec::new())
        }
        async fn resolve_root_thread(&self, session_id: uuid::Uuid) -> EngineResult<uuid::Uuid> {
            Ok(session_id)
        }
        async fn get_child_threads(&self, _session_id: uuid::Uuid) -> EngineResult<Vec<po_core::session::Session>> {
            Ok(Vec::new())
        }
        async fn search_sessions(
            &self,
            _query: Option<&str>,
            _source: Option<Source>,
        ) -> EngineResult<Vec<po_core::session::Session>> {
            Ok(Vec::new())
        }
        async fn store_env_data(&self, _entry: po_core::env_data::EnvDataEntry) -> EngineResult<()> {
            Ok(())
        }
        async fn update_env_data(
            &self,
            _root_thread_id: uuid::Uuid,
            _key: &str,
            _short_description: &str,
            _value: serde_json::Value,
            _stored_by: &str,
        ) -> EngineResult<bool> {
            Ok(false)
        }
        async fn delete_env_data(&self, _root_thread_id: uuid::Uuid, _key: &str) -> EngineResult<bool> {
            Ok(false)
        }
        async fn get_env_data(
            &self,
            _root_thread_id: uuid::Uuid,
            _key: &str,
        ) -> EngineResult<Option<po_core::env_data::EnvDataEntry>> {
            Ok(None)
        }
        async fn list_env_data(&self, _root_thread_id: uuid::Uuid) -> EngineResult<Vec<po_core::env_data::EnvDataSummary>> {
            Ok(Vec::new())
        }
        async fn export_session_markdown(&self, _id: uuid::Uuid) -> EngineResult<String> {
            Ok(String::new())
        }
        async fn export_session_json(&self, _id: uuid::Uuid) -> EngineResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn export_thread_tree_markdown(&self, _id: uuid::Uuid) -> EngineResult<String> {
            Ok(String::new())
        }
        async fn export_thread_tree_json(&self, _id: uuid::Uuid) -> EngineResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn session_usage(&self, _id: uuid::Uuid) -> EngineResult<po_core::store::SessionUsage> {
            Ok(po_core::store::SessionUsage::default())
        }
        async fn thread_tree_usage(&self, _id: uuid::Uuid) -> EngineResult<po_core::store::SessionUsage> {
            Ok(po_core::store::SessionUsage::default())
        }
        async fn record_event(&self, _event: po_core::bus::BusEvent) -> EngineResult<()> {
            Ok(())
        }
        async fn get_events_since(
            &self,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> EngineResult<Vec<po_core::bus::BusEvent>> {
            Ok(Vec::new())
        }
    }

    fn test_ctx() -> TurnContext {
        let store: StdArc<dyn po_core::store::ThreadStore> = StdArc::new(NullStore);
        let bus = StdArc::new(po_core::bus::MessageBus::new());
        let llm = LlmRegistry::new("unused", StdArc::new(UnusedProvider));
        let env = Environment::new(store, bus, llm, "unused-model", std::env::temp_dir());
        TurnContext::top_level(env, Source::Api)
    }

    #[tokio::test]
    async fn verify_rejects_missing_receive_fn() {
        let compiler = RhaiPrimitiveCompiler::new();
        let err = compiler.verify("fn greet() { \"hi\" }").await.unwrap_err();
        assert!(matches!(err, EngineError::Capability { .. }));
    }

    #[tokio::test]
    async fn verify_accepts_well_formed_source() {
        let compiler = RhaiPrimitiveCompiler::new();
        compiler
            .verify("fn receive(message, context) { \"ok\" }")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn compiled_primitive_echoes_message_field() {
        let compiler = RhaiPrimitiveCompiler::new();
        let capability = compiler
            .compile(
                "echo",
                "echoes the message field back",
                serde_json::json!({"type": "object", "properties": {}}),
                "fn receive(message, context) { message.message }",
            )
            .await
            .unwrap();

        let output = capability
            .receive(serde_json::json!({"message": "hello"}), test_ctx())
            .await
            .unwrap();
        assert_eq!(output.content, "hello");
    }
}
