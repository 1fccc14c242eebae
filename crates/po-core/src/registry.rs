// Registry (spec §4.1)
//
// Grounded on `everruns-core::capabilities::CapabilityRegistry`'s
// `Arc`-backed `HashMap<String, Arc<dyn Capability>>`, generalized to
// enforce the three-way disjoint Primitive/PromptObject/Universal
// namespace and to support `reload_po` swapping a PO's backing config in
// place.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::capability::{Capability, CapabilityDescriptor, CapabilityKind};
use crate::error::{EngineError, EngineResult};

#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `name` already exists under a *different* kind — primitive,
    /// PO, and universal are disjoint namespaces, but re-registering the
    /// same kind (e.g. `reload_po`) overwrites in place.
    pub fn register(&self, capability: Arc<dyn Capability>) -> EngineResult<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.get(capability.name()) {
            if existing.kind() != capability.kind() {
                return Err(EngineError::config(format!(
                    "capability '{}' already registered as {}, cannot register as {}",
                    capability.name(),
                    existing.kind(),
                    capability.kind()
                )));
            }
        }
        entries.insert(capability.name().to_string(), capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.read().unwrap().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.write().unwrap().remove(name)
    }

    /// Cheap snapshot for descriptor building (spec §9): clone the
    /// `Arc<dyn Capability>`s out from under the lock, not the lock itself.
    pub fn list(&self, kind: Option<CapabilityKind>) -> Vec<Arc<dyn Capability>> {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|c| kind.is_none_or(|k| c.kind() == k))
            .cloned()
            .collect()
    }

    pub fn descriptors(&self, kind: Option<CapabilityKind>) -> Vec<CapabilityDescriptor> {
        self.list(kind).iter().map(|c| c.descriptor()).collect()
    }

    /// Resolve descriptors for a named subset, skipping names that no
    /// longer resolve (spec §4.3a: "resolved through the registry so
    /// runtime-added capabilities appear").
    pub fn descriptors_for(&self, names: &[String]) -> Vec<CapabilityDescriptor> {
        let entries = self.entries.read().unwrap();
        names
            .iter()
            .filter_map(|n| entries.get(n))
            .map(|c| c.descriptor())
            .collect()
    }

    /// Atomically replace a PO's backing capability, preserving its name
    /// (spec §4.1 `reload_po`). Existing sessions are untouched since they
    /// live in the thread store, not on the capability object.
    pub fn reload_po(&self, capability: Arc<dyn Capability>) -> EngineResult<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.get(capability.name()) {
            if existing.kind() != CapabilityKind::PromptObject
                || capability.kind() != CapabilityKind::PromptObject
            {
                return Err(EngineError::config(format!(
                    "reload_po called for non-prompt-object capability '{}'",
                    capability.name()
                )));
            }
        }
        entries.insert(capability.name().to_string(), capability);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityOutput;
    use crate::error::EngineResult as Result;
    use crate::turn::TurnContext;
    use async_trait::async_trait;

    struct Dummy(&'static str, CapabilityKind);

    #[async_trait]
    impl Capability for Dummy {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> String {
            "dummy".to_string()
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn kind(&self) -> CapabilityKind {
            self.1
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        async fn receive(&self, _args: serde_json::Value, _ctx: TurnContext) -> Result<CapabilityOutput> {
            Ok(CapabilityOutput::text("ok"))
        }
    }

    #[test]
    fn disjoint_namespaces_reject_collision() {
        let registry = Registry::new();
        registry
            .register(Arc::new(Dummy("x", CapabilityKind::Primitive)))
            .unwrap();
        let err = registry
            .register(Arc::new(Dummy("x", CapabilityKind::Universal)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn list_filters_by_kind() {
        let registry = Registry::new();
        registry
            .register(Arc::new(Dummy("a", CapabilityKind::Primitive)))
            .unwrap();
        registry
            .register(Arc::new(Dummy("b", CapabilityKind::Universal)))
            .unwrap();
        assert_eq!(registry.list(Some(CapabilityKind::Primitive)).len(), 1);
        assert_eq!(registry.list(None).len(), 2);
    }
}
