use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::config::PromptObjectConfig;
use crate::error::EngineResult;
use crate::loader;
use crate::prompt_object::PromptObjectCapability;
use crate::turn::TurnContext;

use super::{optional_str, required_str};

fn calling_po<'a>(ctx: &'a TurnContext) -> Result<&'a str, String> {
    ctx.calling_po
        .as_deref()
        .ok_or_else(|| "error (CapabilityError): called outside a prompt object turn".to_string())
}

/// Resolve `name` to a registered prompt object, keeping the owning
/// `Arc<dyn Capability>` alive so callers can `as_any().downcast_ref`
/// against it for the duration of their use.
fn resolve_po(ctx: &TurnContext, name: &str) -> Result<Arc<dyn Capability>, String> {
    let capability = ctx
        .env
        .registry
        .get(name)
        .ok_or_else(|| format!("error (ResolutionError): unknown prompt object: {name}"))?;
    if capability.as_any().downcast_ref::<PromptObjectCapability>().is_none() {
        return Err(format!("error (CapabilityError): '{name}' is not a prompt object"));
    }
    Ok(capability)
}

async fn persist(ctx: &TurnContext, config: &PromptObjectConfig, body: &str) -> Result<(), String> {
    let path = loader::po_file_path(&ctx.env.root, &config.name);
    let rendered = loader::render_po_file(&crate::config::PromptObjectFile {
        config: config.clone(),
        body: body.to_string(),
    })
    .map_err(|e| e.user_message())?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }
    tokio::fs::write(&path, rendered)
        .await
        .map_err(|e| e.to_string())
}

/// `modify_prompt` (spec §4.4): replace the calling PO's body, persisting
/// to its backing file and swapping the live registry entry atomically.
pub struct ModifyPrompt;

#[async_trait]
impl Capability for ModifyPrompt {
    fn name(&self) -> &str {
        "modify_prompt"
    }

    fn description(&self) -> String {
        "Replace this prompt object's own system prompt body.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"body": {"type": "string"}},
            "required": ["body"]
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
            let po_name = calling_po(&ctx)?.to_string();
            let body = required_str(&arguments, "body")?;
            let capability = resolve_po(&ctx, &po_name)?;
            let po = capability.as_any().downcast_ref::<PromptObjectCapability>().unwrap();
            let config = po.config();
            persist(&ctx, &config, &body).await?;
            po.replace(config, body);
            Ok::<_, String>("ok".to_string())
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `create_capability` (spec §4.4): create either a new prompt object
/// (`kind="prompt_object"`) or a new primitive (`kind="primitive"`).
pub struct CreateCapability;

#[async_trait]
impl Capability for CreateCapability {
    fn name(&self) -> &str {
        "create_capability"
    }

    fn description(&self) -> String {
        "Create a new prompt object or primitive capability.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "kind": {"type": "string", "enum": ["prompt_object", "primitive"]},
                "name": {"type": "string"},
                "description": {"type": "string"},
                "capabilities": {"type": "array", "items": {"type": "string"}},
                "body": {"type": "string", "description": "Prompt body, for kind=prompt_object"},
                "code": {"type": "string", "description": "Source code, for kind=primitive"},
                "parameters": {"type": "object", "description": "JSON-schema parameters, for kind=primitive"}
            },
            "required": ["kind", "name"]
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
            let kind = required_str(&arguments, "kind")?;
            let name = required_str(&arguments, "name")?;
            if ctx.env.registry.has(&name) {
                return Err(format!("error (ConfigError): capability '{name}' already exists"));
            }
            let description = optional_str(&arguments, "description").unwrap_or_default();

            match kind.as_str() {
                "prompt_object" => {
                    let body = required_str(&arguments, "body")?;
                    let capabilities = arguments
                        .get("capabilities")
                        .and_then(|v| v.as_array())
                        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                    let config = PromptObjectConfig {
                        name: name.clone(),
                        description,
                        capabilities,
                        watches_env_data: None,
                    };
                    persist(&ctx, &config, &body).await?;
                    let capability: Arc<dyn Capability> = Arc::new(PromptObjectCapability::new(config, body));
                    ctx.env.registry.register(capability).map_err(|e| e.user_message())?;
                    Ok(format!("created prompt object '{name}'"))
                }
                "primitive" => {
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
                other => Err(format!("error (ConfigError): unknown kind '{other}'")),
            }
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

async fn mutate_capabilities(ctx: &TurnContext, name: &str, add: bool) -> Result<String, String> {
    let po_name = calling_po(ctx)?.to_string();
    let capability = resolve_po(ctx, &po_name)?;
    let po = capability.as_any().downcast_ref::<PromptObjectCapability>().unwrap();
    let mut config = po.config();
    if add {
        if !config.capabilities.iter().any(|c| c == name) {
            config.capabilities.push(name.to_string());
        }
    } else {
        config.capabilities.retain(|c| c != name);
    }
    let body = po.body();
    persist(ctx, &config, &body).await?;
    po.replace(config, body);
    Ok("ok".to_string())
}

/// `add_capability` (spec §4.4): append to the calling PO's declared
/// capability list.
pub struct AddCapability;

#[async_trait]
impl Capability for AddCapability {
    fn name(&self) -> &str {
        "add_capability"
    }

    fn description(&self) -> String {
        "Add a capability name to this prompt object's declared list.".to_string()
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
        let result = match required_str(&arguments, "name") {
            Ok(name) => mutate_capabilities(&ctx, &name, true).await,
            Err(e) => Err(e),
        };
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `remove_capability` (spec §4.4): the inverse of `add_capability`.
pub struct RemoveCapability;

#[async_trait]
impl Capability for RemoveCapability {
    fn name(&self) -> &str {
        "remove_capability"
    }

    fn description(&self) -> String {
        "Remove a capability name from this prompt object's declared list.".to_string()
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
        let result = match required_str(&arguments, "name") {
            Ok(name) => mutate_capabilities(&ctx, &name, false).await,
            Err(e) => Err(e),
        };
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `list_capabilities` (spec §4.4): filtered registry listing. `kind`
/// accepts `all`/`po`/`primitive`/`universal`/`active`, where `active`
/// means the calling PO's own declared list plus every universal.
pub struct ListCapabilities;

#[async_trait]
impl Capability for ListCapabilities {
    fn name(&self) -> &str {
        "list_capabilities"
    }

    fn description(&self) -> String {
        "List registered capabilities, optionally filtered by kind.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "kind": {"type": "string", "enum": ["all", "po", "primitive", "universal", "active"]}
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
        let filter = optional_str(&arguments, "kind").unwrap_or_else(|| "all".to_string());
        let descriptors = match filter.as_str() {
            "po" => ctx.env.registry.descriptors(Some(CapabilityKind::PromptObject)),
            "primitive" => ctx.env.registry.descriptors(Some(CapabilityKind::Primitive)),
            "universal" => ctx.env.registry.descriptors(Some(CapabilityKind::Universal)),
            "active" => {
                let mut names = ctx
                    .calling_po
                    .as_deref()
                    .and_then(|n| ctx.env.registry.get(n))
                    .and_then(|c| {
                        c.as_any()
                            .downcast_ref::<PromptObjectCapability>()
                            .map(|po| po.config().capabilities)
                    })
                    .unwrap_or_default();
                for universal in ctx.env.registry.list(Some(CapabilityKind::Universal)) {
                    names.push(universal.name().to_string());
                }
                ctx.env.registry.descriptors_for(&names)
            }
            _ => ctx.env.registry.descriptors(None),
        };
        Ok(CapabilityOutput::json(
            serde_json::to_value(descriptors).unwrap_or_default(),
        ))
    }
}

