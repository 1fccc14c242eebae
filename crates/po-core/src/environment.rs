// Environment: the one value carrying all process-wide state (spec §9
// "Global mutable state: there is none at the process level. Everything
// lives inside an `Environment` value carrying registry, store, bus,
// queue"). Multiple environments may coexist in-process with no shared
// state.

use std::sync::Arc;

use uuid::Uuid;

use crate::bus::MessageBus;
use crate::capability::{extract_message, Capability, CapabilityKind};
use crate::error::{EngineError, EngineResult};
use crate::human::HumanQueue;
use crate::llm::LlmRegistry;
use crate::primitive::PrimitiveCompiler;
use crate::registry::Registry;
use crate::session::Source;
use crate::store::ThreadStore;
use crate::turn::TurnContext;

pub struct Environment {
    pub registry: Registry,
    pub store: Arc<dyn ThreadStore>,
    pub bus: Arc<MessageBus>,
    pub human_queue: Arc<HumanQueue>,
    pub llm: LlmRegistry,
    /// Model string passed to the resolved provider; POs don't declare a
    /// model in frontmatter (spec §3), so this is an environment-wide
    /// default, overridable per session by the `switch_llm` command.
    pub default_model: String,
    /// Root directory of the environment (PO markdown files, primitive
    /// source, `sessions.db`) — spec §6 "Persisted state layout".
    pub root: std::path::PathBuf,
    /// Optional unbounded-by-default cap on turn iterations (spec §4.3,
    /// §9 open question).
    pub max_iterations: Option<usize>,
    /// Absent when no dynamic primitive compiler is wired in; `create_primitive`
    /// then reports a config error rather than panicking.
    pub primitive_compiler: Option<Arc<dyn PrimitiveCompiler>>,
}

impl Environment {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        bus: Arc<MessageBus>,
        llm: LlmRegistry,
        default_model: impl Into<String>,
        root: std::path::PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(),
            store,
            bus,
            human_queue: Arc::new(HumanQueue::new()),
            llm,
            default_model: default_model.into(),
            root,
            max_iterations: None,
            primitive_compiler: None,
        })
    }

    pub fn with_primitive_compiler(mut self: Arc<Self>, compiler: Arc<dyn PrimitiveCompiler>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_primitive_compiler called before Environment is shared")
            .primitive_compiler = Some(compiler);
        self
    }

    pub fn with_max_iterations(mut self: Arc<Self>, max_iterations: usize) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_max_iterations called before Environment is shared")
            .max_iterations = Some(max_iterations);
        self
    }

    /// Top-level entry point a connector calls: `receive` on a named PO
    /// with a duck-typed message (spec §9 "Duck-typed messages").
    pub async fn send_message(
        self: &Arc<Self>,
        po_name: &str,
        incoming: serde_json::Value,
        session_id: Option<Uuid>,
        source: Source,
    ) -> EngineResult<String> {
        let capability = self
            .registry
            .get(po_name)
            .ok_or_else(|| EngineError::PromptObjectNotFound(po_name.to_string()))?;
        if capability.kind() != CapabilityKind::PromptObject {
            return Err(EngineError::config(format!(
                "'{po_name}' is not a prompt object"
            )));
        }

        let ctx = match session_id {
            Some(id) => TurnContext::top_level_in_session(self.clone(), id, source),
            None => TurnContext::top_level(self.clone(), source),
        };

        let message = match &incoming {
            serde_json::Value::String(s) => s.clone(),
            other => extract_message(other),
        };

        let output = capability
            .receive(serde_json::json!({ "message": message }), ctx)
            .await?;
        Ok(output.content)
    }

    /// Walk parent pointers up to the session with no parent (spec §4.5).
    pub async fn resolve_root_thread(&self, session_id: Uuid) -> EngineResult<Uuid> {
        self.store.resolve_root_thread(session_id).await
    }
}
