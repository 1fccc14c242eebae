// PromptObjectCapability: a Capability backed by frontmatter + markdown
// body, reloadable in place (spec §4.1 `reload_po`, §3 "Prompt Object").

use std::sync::RwLock;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::config::PromptObjectConfig;
use crate::dispatcher::{self, PoHandle};
use crate::error::EngineResult;
use crate::turn::TurnContext;

pub struct PromptObjectCapability {
    name: String,
    state: RwLock<PromptObjectState>,
}

struct PromptObjectState {
    config: PromptObjectConfig,
    body: String,
}

impl PromptObjectCapability {
    pub fn new(config: PromptObjectConfig, body: String) -> Self {
        Self {
            name: config.name.clone(),
            state: RwLock::new(PromptObjectState { config, body }),
        }
    }

    /// Atomically swap the backing config/body (spec §4.1, §4.4
    /// `modify_prompt`/`add_capability`/`remove_capability`).
    pub fn replace(&self, config: PromptObjectConfig, body: String) {
        let mut state = self.state.write().unwrap();
        state.config = config;
        state.body = body;
    }

    pub fn body(&self) -> String {
        self.state.read().unwrap().body.clone()
    }

    pub fn config(&self) -> PromptObjectConfig {
        self.state.read().unwrap().config.clone()
    }
}

#[async_trait]
impl Capability for PromptObjectCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.state.read().unwrap().config.description.clone()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Message to send to this prompt object"}
            },
            "required": ["message"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::PromptObject
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(
        &self,
        arguments: serde_json::Value,
        ctx: TurnContext,
    ) -> EngineResult<CapabilityOutput> {
        let state = self.state.read().unwrap();
        let handle = PoHandle {
            name: &self.name,
            body: &state.body,
            capabilities: &state.config.capabilities,
        };
        let max_iterations = ctx.env.max_iterations;
        // Drop the read guard before awaiting — `state` must not be held
        // across the turn loop, which may call back into this same PO via
        // `reload_po`/`modify_prompt`.
        let name = handle.name.to_string();
        let body = handle.body.to_string();
        let capabilities = handle.capabilities.to_vec();
        drop(state);
        dispatcher::run_turn(
            PoHandle {
                name: &name,
                body: &body,
                capabilities: &capabilities,
            },
            arguments,
            ctx,
            max_iterations,
        )
        .await
    }
}
