// Capability: the uniform interface all invocable things satisfy
// (spec §3 "Capability", §9 "Model a Capability as a sum type").
//
// Grounded on `everruns-core::capabilities::Capability`, generalized from
// "tool contributor bundled into an agent config" to a disjoint
// Primitive / PromptObject / Universal sum type (spec §9 "Model a
// Capability as a sum type"), all resolved by name through one `Registry`
// (no direct object references — spec §9).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::turn::TurnContext;

/// Which of the three disjoint namespaces a capability belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Primitive,
    PromptObject,
    Universal,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::Primitive => write!(f, "primitive"),
            CapabilityKind::PromptObject => write!(f, "prompt_object"),
            CapabilityKind::Universal => write!(f, "universal"),
        }
    }
}

/// Name, description and JSON-Schema-shaped parameters for one capability,
/// the shape the LLM adapter needs to build tool descriptors (spec §4.3a).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub kind: CapabilityKind,
}

/// Outcome of invoking a capability: the textual result that becomes a
/// tool-result's `content` (spec §4.3g: "stringify structured values").
#[derive(Debug, Clone)]
pub struct CapabilityOutput {
    pub content: String,
}

impl CapabilityOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self {
            content: serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string()),
        }
    }
}

/// Shared interface `{name, description, parameters, receive}` (spec §9).
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    /// Owned rather than borrowed: reloadable capabilities (prompt objects)
    /// keep their description behind a lock, so there is no stable `&str`
    /// to hand back.
    fn description(&self) -> String;
    fn parameters(&self) -> serde_json::Value;
    fn kind(&self) -> CapabilityKind;

    /// Lets `modify_prompt`/`add_capability`-style universals downcast a
    /// registry entry back to its concrete type (`PromptObjectCapability`)
    /// when they need to mutate it in place.
    fn as_any(&self) -> &dyn std::any::Any;

    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description(),
            parameters: self.parameters(),
            kind: self.kind(),
        }
    }

    /// Invoke the capability. `arguments` is the JSON object the LLM (or a
    /// top-level caller) supplied; a `PromptObject` capability additionally
    /// honors a `"message"` string key when normalizing incoming text
    /// (spec §9 "Duck-typed messages").
    async fn receive(
        &self,
        arguments: serde_json::Value,
        ctx: TurnContext,
    ) -> EngineResult<CapabilityOutput>;
}

/// Pull a best-effort textual message out of tool-call-shaped arguments:
/// prefers a `"message"` string field, falls back to the whole payload
/// serialized. Used at the delegation boundary and by primitives that
/// expect free text instead of a full schema.
pub fn extract_message(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => serde_json::to_string(arguments).unwrap_or_default(),
        },
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
