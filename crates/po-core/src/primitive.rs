// Primitive: a capability whose `receive` is native or compiled code
// (spec §3 "Primitive"). `po-core` defines the narrow trait and the
// `Capability` adapter; concrete primitives (the shipped stdlib, and the
// `rhai`-backed dynamic compiler for runtime-authored ones) live in
// `po-engine`, which owns process I/O.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::error::EngineResult;
use crate::turn::TurnContext;

/// What a primitive's source is, for `list_primitives`'s stdlib/custom
/// filter (spec §4.4 `list_primitives`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveOrigin {
    Stdlib,
    Custom,
}

/// Native implementation of a primitive capability.
#[async_trait]
pub trait PrimitiveFn: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;
    fn origin(&self) -> PrimitiveOrigin;

    async fn invoke(&self, arguments: serde_json::Value, ctx: &TurnContext) -> EngineResult<String>;
}

/// Compiles runtime-authored primitive source into a registrable
/// `Capability` (spec §4.4 `create_primitive`/`modify_primitive`). `po-core`
/// only declares the contract — `po-engine` owns the `rhai` compiler, kept
/// out of this crate the same way a concrete `ThreadStore`/`LlmProvider`
/// is kept out.
#[async_trait]
pub trait PrimitiveCompiler: Send + Sync {
    /// Syntax/shape check without registering (spec §4.4 `verify_primitive`).
    async fn verify(&self, source: &str) -> EngineResult<()>;

    /// Compile `source` into a capability named `name`. Replacing an
    /// existing custom primitive (`modify_primitive`) is the caller's
    /// responsibility via `Registry::register`.
    async fn compile(
        &self,
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        source: &str,
    ) -> EngineResult<Arc<dyn Capability>>;
}

/// Adapts a `PrimitiveFn` into the uniform `Capability` interface.
pub struct PrimitiveCapability(pub Arc<dyn PrimitiveFn>);

#[async_trait]
impl Capability for PrimitiveCapability {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> String {
        self.0.description().to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        self.0.parameters()
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
        let content = self.0.invoke(arguments, &ctx).await?;
        Ok(CapabilityOutput::text(content))
    }
}
