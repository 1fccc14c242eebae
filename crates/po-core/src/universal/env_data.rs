use async_trait::async_trait;
use chrono::Utc;

use crate::capability::{Capability, CapabilityKind, CapabilityOutput};
use crate::env_data::EnvDataEntry;
use crate::error::EngineResult;
use crate::turn::TurnContext;

use super::required_str;

/// Resolve the delegation tree's root thread for the active session — env
/// data is scoped there regardless of how deep the calling PO is nested
/// (spec §4.5 stigmergic coordination, §8 scenario 6).
async fn root_thread(ctx: &TurnContext) -> Result<uuid::Uuid, String> {
    let session_id = ctx
        .session_id
        .ok_or_else(|| "error (CapabilityError): no active session".to_string())?;
    ctx.env
        .resolve_root_thread(session_id)
        .await
        .map_err(|e| e.user_message())
}

/// `store_env_data` (spec §4.4): writes carry `stored_by = calling PO`.
pub struct StoreEnvData;

#[async_trait]
impl Capability for StoreEnvData {
    fn name(&self) -> &str {
        "store_env_data"
    }

    fn description(&self) -> String {
        "Store a key/value entry scoped to this delegation tree's root thread.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "short_description": {"type": "string"},
                "value": {}
            },
            "required": ["key", "short_description", "value"]
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
            let key = required_str(&arguments, "key")?;
            let short_description = required_str(&arguments, "short_description")?;
            let value = arguments
                .get("value")
                .cloned()
                .ok_or_else(|| "error (CapabilityError): missing required field `value`".to_string())?;
            let root_thread_id = root_thread(&ctx).await?;
            let stored_by = ctx.calling_po.clone().unwrap_or_default();
            let now = Utc::now();
            ctx.env
                .store
                .store_env_data(EnvDataEntry {
                    root_thread_id,
                    key: key.clone(),
                    short_description,
                    value,
                    stored_by,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .map_err(|e| e.user_message())?;
            ctx.env.bus.notify_env_data_change(root_thread_id, &key);
            Ok("ok".to_string())
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `update_env_data` (spec §4.4, §8): a no-op write on an absent key
/// returns `false` without writing.
pub struct UpdateEnvData;

#[async_trait]
impl Capability for UpdateEnvData {
    fn name(&self) -> &str {
        "update_env_data"
    }

    fn description(&self) -> String {
        "Update an existing env data entry; fails if the key is absent.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "short_description": {"type": "string"},
                "value": {}
            },
            "required": ["key", "short_description", "value"]
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
            let key = required_str(&arguments, "key")?;
            let short_description = required_str(&arguments, "short_description")?;
            let value = arguments
                .get("value")
                .cloned()
                .ok_or_else(|| "error (CapabilityError): missing required field `value`".to_string())?;
            let root_thread_id = root_thread(&ctx).await?;
            let stored_by = ctx.calling_po.clone().unwrap_or_default();
            let updated = ctx
                .env
                .store
                .update_env_data(root_thread_id, &key, &short_description, value, &stored_by)
                .await
                .map_err(|e| e.user_message())?;
            if updated {
                ctx.env.bus.notify_env_data_change(root_thread_id, &key);
                Ok("ok".to_string())
            } else {
                Ok(format!("error (ResolutionError): no env data entry for key '{key}'"))
            }
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `delete_env_data` (spec §4.4).
pub struct DeleteEnvData;

#[async_trait]
impl Capability for DeleteEnvData {
    fn name(&self) -> &str {
        "delete_env_data"
    }

    fn description(&self) -> String {
        "Delete an env data entry by key.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"]
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
            let key = required_str(&arguments, "key")?;
            let root_thread_id = root_thread(&ctx).await?;
            let deleted = ctx
                .env
                .store
                .delete_env_data(root_thread_id, &key)
                .await
                .map_err(|e| e.user_message())?;
            if deleted {
                ctx.env.bus.notify_env_data_change(root_thread_id, &key);
                Ok("ok".to_string())
            } else {
                Ok(format!("error (ResolutionError): no env data entry for key '{key}'"))
            }
        }
        .await;
        Ok(CapabilityOutput::text(result.unwrap_or_else(|e| e)))
    }
}

/// `get_env_data` (spec §4.4): returns the full value, unlike the listing
/// projection which withholds it.
pub struct GetEnvData;

#[async_trait]
impl Capability for GetEnvData {
    fn name(&self) -> &str {
        "get_env_data"
    }

    fn description(&self) -> String {
        "Fetch one env data entry's value by key.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"]
        })
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let key = match required_str(&arguments, "key") {
            Ok(k) => k,
            Err(msg) => return Ok(CapabilityOutput::text(msg)),
        };
        let root_thread_id = match root_thread(&ctx).await {
            Ok(id) => id,
            Err(msg) => return Ok(CapabilityOutput::text(msg)),
        };
        match ctx.env.store.get_env_data(root_thread_id, &key).await {
            Ok(Some(entry)) => Ok(CapabilityOutput::json(entry.value)),
            Ok(None) => Ok(CapabilityOutput::text(format!(
                "error (ResolutionError): no env data entry for key '{key}'"
            ))),
            Err(e) => Ok(CapabilityOutput::text(format!("error (StoreError): {}", e.user_message()))),
        }
    }
}

/// `list_env_data` (spec §4.4, §3): withholds `value` per entry.
pub struct ListEnvData;

#[async_trait]
impl Capability for ListEnvData {
    fn name(&self) -> &str {
        "list_env_data"
    }

    fn description(&self) -> String {
        "List env data keys visible to this delegation tree, without values.".to_string()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Universal
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn receive(&self, _arguments: serde_json::Value, ctx: TurnContext) -> EngineResult<CapabilityOutput> {
        let root_thread_id = match root_thread(&ctx).await {
            Ok(id) => id,
            Err(msg) => return Ok(CapabilityOutput::text(msg)),
        };
        match ctx.env.store.list_env_data(root_thread_id).await {
            Ok(entries) => Ok(CapabilityOutput::json(serde_json::to_value(entries).unwrap_or_default())),
            Err(e) => Ok(CapabilityOutput::text(format!("error (StoreError): {}", e.user_message()))),
        }
    }
}
