use async_trait::async_trait;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::error::EngineResult;
use crate::loader;
use crate::turn::TurnContext;

use super::{optional_str, required_str};

/// `create_primitive` (spec §4.4): compile new primitive source, register
/// it, and persist it under `primitives/`. Distinct from
/// `create_capability(kind="primitive")` only in not also accepting
/// `kind="prompt_object"` — both end up calling the same compiler.
pub struct CreatePrimitive;

#[async_trait]
impl Capability for CreatePrimitive {
    fn name(&self) -> &str {
        "create_primitive"
    }

    fn description(&self) -> String {
        "Compile and register a new primitive from source.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "code": {"type": "string"},
                "parameters": {"type": "object"}
            },
            "required": ["name", "code"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let result = async {
            let name = required_str(&arguments, "name")?;
            if ctx.env.registry.has(&name) {
                return Err(format!("error (ConfigError): capability '{name}' already exists"));
            }
            let description = optional_str(&arguments, "description").unwrap_or_default();
            let source = required_str(&arguments, "code")?;
            let parameters = arguments
                .get("parameters")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));

            let compiler = ctx
                .env
                .primitive_compiler
                .clone()
                .ok_or_else(|| "error (ConfigError): no primitive compiler configured".to_string())?;
            let capability = compiler
                .compile(&name, &description, parameters, &source)
                .await
                .map_err(|e| e.user_message())?;

            let path = loader::primitive_file_path(&ctx.env.root, &name, "rhai");
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
            }
            tokio::fs::write(&path, &source).await.map_err(|e| e.to_string())?;
            ctx.env.registry.register(capability).map_err(|e| e.user_message())?;
            Ok(format!("created primitive '{name}'"))
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `modify_primitive` (spec §4.4): recompile and replace an existing
/// custom primitive's code in place.
pub struct ModifyPrimitive;

#[async_trait]
impl Capability for ModifyPrimitive {
    fn name(&self) -> &str {
        "modify_primitive"
    }

    fn description(&self) -> String {
        "Recompile an existing primitive's source in place.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "code": {"type": "string"},
                "parameters": {"type": "object"}
            },
            "required": ["name", "code"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let result = async {
            let name = required_str(&arguments, "name")?;
            let existing = ctx
                .env
                .registry
                .get(&name)
                .ok_or_else(|| format!("error (ResolutionError): unknown primitive: {name}"))?;
            if existing.kind() != CapabilityKind::Primitive {
                return Err(format!("error (CapabilityError): '{name}' is not a primitive"));
            }
            let description = optional_str(&arguments, "description").unwrap_or_else(|| existing.description());
            let source = required_str(&arguments, "code")?;
            let parameters = arguments.get("parameters").cloned().unwrap_or_else(|| existing.parameters());

            let compiler = ctx
                .env
                .primitive_compiler
                .clone()
                .ok_or_else(|| "error (ConfigError): no primitive compiler configured".to_string())?;
            let capability = compiler
                .compile(&name, &description, parameters, &source)
                .await
                .map_err(|e| e.user_message())?;

            let path = loader::primitive_file_path(&ctx.env.root, &name, "rhai");
            tokio::fs::write(&path, &source).await.map_err(|e| e.to_string())?;
            ctx.env.registry.register(capability).map_err(|e| e.user_message())?;
            Ok(format!("modified primitive '{name}'"))
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `delete_primitive` (spec §4.4): remove a custom primitive from the
/// registry and disk.
pub struct DeletePrimitive;

#[async_trait]
impl Capability for DeletePrimitive {
    fn name(&self) -> &str {
        "delete_primitive"
    }

    fn description(&self) -> String {
        "Remove a primitive from the registry and from disk.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let result = async {
            let name = required_str(&arguments, "name")?;
            let existing = ctx
                .env
                .registry
                .get(&name)
                .ok_or_else(|| format!("error (ResolutionError): unknown primitive: {name}"))?;
            if existing.kind() != CapabilityKind::Primitive {
                return Err(format!("error (CapabilityError): '{name}' is not a primitive"));
            }
            ctx.env.registry.remove(&name);
            let path = loader::primitive_file_path(&ctx.env.root, &name, "rhai");
            let _ = tokio::fs::remove_file(&path).await;
            Ok(format!("deleted primitive '{name}'"))
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `verify_primitive` (spec §4.4): execute a primitive against a sample
/// input and return the result without persisting anything.
pub struct VerifyPrimitive;

#[async_trait]
impl Capability for VerifyPrimitive {
    fn name(&self) -> &str {
        "verify_primitive"
    }

    fn description(&self) -> String {
        "Run a primitive against a sample input without persisting anything.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "sample_input": {"type": "object"}
            },
            "required": ["name", "sample_input"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let name = match required_str(&arguments, "name") {
            Ok(n) => n,
            Err(msg) => return Ok(CapabilityOutput::text(msg)),
        };
        let sample_input = arguments.get("sample_input").cloned().unwrap_or(serde_json::Value::Null);

        let Some(capability) = ctx.env.registry.get(&name) else {
            return Ok(CapabilityOutput::text(format!(
                "error (ResolutionError): unknown primitive: {name}"
            )));
        };
        if capability.kind() != CapabilityKind::Primitive {
            return Ok(CapabilityOutput::text(format!(
                "error (CapabilityError): '{name}' is not a primitive"
            )));
        }

        match capability.receive(sample_input, ctx.clone()).await {
            Ok(out) => Ok(CapabilityOutput::text(out.content)),
            Err(e) => Ok(CapabilityOutput::text(format!("error (CapabilityError): {}", e.user_message()))),
        }
    }
}

/// `list_primitives` (spec §4.4): filtered listing. The `stdlib`/`custom`
/// split relies on `po-engine`'s stdlib primitives being registered before
/// any runtime-authored ones exist; since `Registry` only stores
/// `Arc<dyn Capability>`, the filter here is name-list based, supplied by
/// the caller, rather than introspecting origin through the trait object.
pub struct ListPrimitives;

#[async_trait]
impl Capability for ListPrimitives {
    fn name(&self) -> &str {
        "list_primitives"
    }

    fn description(&self) -> String {
        "List registered primitives, optionally filtered.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filter": {"type": "string", "enum": ["all", "active"]}
            }
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let filter = optional_str(&arguments, "filter").unwrap_or_else(|| "all".to_string());
        let descriptors = if filter == "active" {
            let names: Vec<String> = ctx
                .calling_po
                .as_deref()
                .and_then(|n| ctx.env.registry.get(n))
                .and_then(|c| {
                    c.as_any()
                        .downcast_ref::<crate::prompt_object::PromptObjectCapability>()
                        .map(|po| po.config().capabilities)
                })
                .unwrap_or_default();
            ctx.env
                .registry
                .descriptors_for(&names)
                .into_iter()
                .filter(|d| d.kind == CapabilityKind::Primitive)
                .collect::<Vec<_>>()
        } else {
            ctx.env.registry.descriptors(Some(CapabilityKind::Primitive))
        };
        Ok(CapabilityOutput::json(
            serde_json::to_value(descriptors).unwrap_or_default(),
        ))
    }
}
