use async_trait::async_trait;

use po_core::error::{EngineError, EngineResult};
use po_core::primitive::{PrimitiveFn, PrimitiveOrigin};
use po_core::turn::TurnContext;

use super::resolve_within;

pub struct WriteFile;

#[async_trait]
impl PrimitiveFn for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write (creating or overwriting) a file relative to the environment root."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the environment root"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    fn origin(&self) -> PrimitiveOrigin {
        PrimitiveOrigin::Stdlib
    }

    async fn invoke(&self, arguments: serde_json::Value, ctx: &TurnContext) -> EngineResult<String> {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::capability("write_file", "missing required argument: path"))?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::capability("write_file", "missing required argument: content"))?;
        let resolved = resolve_within(&ctx.env.root, path)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::capability("write_file", e.to_string()))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| EngineError::capability("write_file", format!("{}: {e}", resolved.display())))?;

        Ok(format!("wrote {} bytes to {}", content.len(), path))
    }
}
