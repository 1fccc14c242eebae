use async_trait::async_trait;

use po_core::error::{EngineError, EngineResult};
use po_core::primitive::{PrimitiveFn, PrimitiveOrigin};
use po_core::turn::TurnContext;

use super::resolve_within;

pub struct ListFiles;

#[async_trait]
impl PrimitiveFn for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List file names in a directory relative to the environment root."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the environment root, defaults to the root itself"}
            }
        })
    }

    fn origin(&self) -> PrimitiveOrigin {
        PrimitiveOrigin::Stdlib
    }

    async fn invoke(&self, arguments: serde_json::Value, ctx: &TurnContext) -> EngineResult<String> {
        let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = resolve_within(&ctx.env.root, path)?;

        let mut entries = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| EngineError::capability("list_files", format!("{}: {e}", resolved.display())))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::capability("list_files", e.to_string()))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string()))
    }
}
