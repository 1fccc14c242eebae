// Stdlib primitives (spec §0 "hosts the primitive stdlib"): native
// `PrimitiveFn` implementations registered at boot, distinct from
// runtime-compiled `.rhai` primitives. Every path argument is resolved
// relative to the environment root (spec §6 "Persisted state layout") so a
// primitive can't read or write outside the environment directory it was
// booted against.

mod http_get;
mod list_files;
mod read_file;
mod write_file;

pub use http_get::HttpGet;
pub use list_files::ListFiles;
pub use read_file::ReadFile;
pub use write_file::WriteFile;

use std::path::{Path, PathBuf};

use po_core::error::{EngineError, EngineResult};

/// Join `relative` onto `root`, rejecting absolute paths and `..`
/// components so a primitive can't escape the environment directory.
fn resolve_within(root: &Path, relative: &str) -> EngineResult<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(EngineError::capability(
            "path",
            format!("path must be relative and within the environment root: {relative}"),
        ));
    }
    Ok(root.join(candidate))
}

/// Register every stdlib primitive into `registry` (spec §4.2 "native Rust
/// primitives are registered in-process at startup").
pub fn register_stdlib(registry: &po_core::registry::Registry) -> EngineResult<()> {
    use po_core::primitive::PrimitiveCapability;
    use std::sync::Arc;

    registry.register(Arc::new(PrimitiveCapability(Arc::new(ReadFile))))?;
    registry.register(Arc::new(PrimitiveCapability(Arc::new(ListFiles))))?;
    registry.register(Arc::new(PrimitiveCapability(Arc::new(WriteFile))))?;
    registry.register(Arc::new(PrimitiveCapability(Arc::new(HttpGet))))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_and_parent_escapes() {
        let root = Path::new("/env");
        assert!(resolve_within(root, "/etc/passwd").is_err());
        assert!(resolve_within(root, "../outside").is_err());
        assert!(resolve_within(root, "objects/greeter.md").is_ok());
    }
}
