// Shared application state for every front-end (axum HTTP+WS, MCP stdio).
// Grounded on everruns-api::AppState's "one Arc<Database> cloned into every
// module's own State struct" shape, generalized to the single Environment +
// Runner pair every PromptObjects front-end needs (spec §0).

use std::sync::Arc;

use po_core::bus::MessageBus;
use po_core::environment::Environment;
use po_engine::Runner;

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<Environment>,
    pub runner: Arc<Runner>,
}

impl AppState {
    pub fn new(env: Arc<Environment>, runner: Arc<Runner>) -> Self {
        Self { env, runner }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.env.bus
    }
}
