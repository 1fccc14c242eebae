// Universal capabilities (spec §4.4): built-in operations available to
// every prompt object without declaration, registered into the registry at
// boot and never reloadable (spec §3: "Universal capabilities ... are
// registered at startup and not reloadable").
//
// Each operation is its own `Capability` impl with `kind() = Universal`,
// matching the sum-type design in `capability.rs`. Dispatch invariant (spec
// §4.4): a universal never raises — failures are converted to a structured
// text result inside `receive` itself, never propagated as `Err`, except
// for genuine engine-internal faults (store I/O) which do surface as `Err`
// so the dispatcher's existing `CapabilityError` classification still
// applies uniformly.

mod ask_human;
mod capabilities_mgmt;
mod env_data;
mod primitives;
mod think;

use std::sync::Arc;

use crate::capability::Capability;
use crate::error::EngineResult;
use crate::registry::Registry;

/// Register all universal capabilities into `registry`. Idempotent only in
/// the sense that `Registry::register` allows same-kind re-registration;
/// call once at environment boot.
pub fn register_all(registry: &Registry) -> EngineResult<()> {
    let caps: Vec<Arc<dyn Capability>> = vec![
        Arc::new(ask_human::AskHuman),
        Arc::new(think::Think),
        Arc::new(capabilities_mgmt::ModifyPrompt),
        Arc::new(capabilities_mgmt::CreateCapability),
        Arc::new(capabilities_mgmt::AddCapability),
        Arc::new(capabilities_mgmt::RemoveCapability),
        Arc::new(capabilities_mgmt::ListCapabilities),
        Arc::new(primitives::CreatePrimitive),
        Arc::new(primitives::ModifyPrimitive),
        Arc::new(primitives::DeletePrimitive),
        Arc::new(primitives::VerifyPrimitive),
        Arc::new(primitives::ListPrimitives),
        Arc::new(env_data::StoreEnvData),
        Arc::new(env_data::UpdateEnvData),
        Arc::new(env_data::DeleteEnvData),
        Arc::new(env_data::GetEnvData),
        Arc::new(env_data::ListEnvData),
    ];
    for cap in caps {
        registry.register(cap)?;
    }
    Ok(())
}

/// Shared argument-extraction helper: pull a required string field out of
/// the tool-call arguments object, producing a `CapabilityOutput`-shaped
/// error string rather than an `Err` (spec §4.4: "universals never raise").
pub(crate) fn required_str(args: &serde_json::Value, field: &str) -> Result<String, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("error (CapabilityError): missing required field `{field}`"))
}

pub(crate) fn optional_str(args: &serde_json::Value, field: &str) -> Option<String> {
    args.get(field).and_then(|v| v.as_str()).map(|s| s.to_string())
}
