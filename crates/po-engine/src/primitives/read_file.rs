use async_trait::async_trait;

use po_core::error::{EngineError, EngineResult};
use po_core::primitive::{PrimitiveFn, PrimitiveOrigin};
use po_core::turn::TurnContext;

use super::resolve_within;

pub struct ReadFile;

#[async_trait]
impl PrimitiveFn for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file relative to the environment root."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the environment root"}
            },
            "required": ["path"]
        })
    }

    fn origin(&self) -> PrimitiveOrigin {
        PrimitiveOrigin::Stdlib
    }

    async fn invoke(&self, arguments: serde_json::Value, ctx: &TurnContext) -> EngineResult<String> {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::capability("read_file", "missing required argument: path"))?;
        let resolved = resolve_within(&ctx.env.root, path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| EngineError::capability("read_file", format!("{}: {e}", resolved.display())))
    }
}
