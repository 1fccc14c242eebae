use async_trait::async_trait;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::error::EngineResult;
use crate::turn::TurnContext;

use super::required_str;

/// `think` (spec §4.4): a structured scratchpad. The submitted text is
/// simply echoed back as the tool result, relying on the dispatcher's
/// normal message persistence to keep it in the transcript — there is no
/// separate store for it and the capability itself holds no state.
pub struct Think;

#[async_trait]
impl Capability for Think {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> String {
        "Record a reasoning step without taking any action.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought": {"type": "string", "description": "The reasoning to record"}
            },
            "required": ["thought"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(
        &self,
        arguments: serde_json::Value,
        _ctx: TurnContext,
    ) -> EngineResult<CapabilityOutput> {
        match required_str(&arguments, "thought") {
            Ok(thought) => Ok(CapabilityOutput::text(thought)),
            Err(msg) => Ok(CapabilityOutput::text(msg)),
        }
    }
}
