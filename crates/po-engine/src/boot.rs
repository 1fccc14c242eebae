// Environment assembly (spec §0 "wires the registry/store/bus/queue into
// one Environment"): the single boot path every front-end (CLI `serve`,
// `mcp`, `tui`, and tests) goes through so the universal capabilities,
// stdlib primitives, and dynamic primitive compiler are always present
// together.

use std::path::PathBuf;
use std::sync::Arc;

use po_core::bus::MessageBus;
use po_core::environment::Environment;
use po_core::error::EngineResult;
use po_core::llm::LlmRegistry;
use po_core::loader::{load_prompt_objects, verify_primitive_sources, LoadReport};
use po_core::store::ThreadStore;
use tracing::warn;

use crate::primitives::register_stdlib;
use crate::rhai_compiler::RhaiPrimitiveCompiler;

/// Load reports from booting an environment — surfaced to the caller so a
/// CLI/server can log malformed PO files without treating them as fatal
/// (spec §4.2: "a malformed definition should not prevent the rest of the
/// environment from booting").
pub struct BootReport {
    pub prompt_objects: LoadReport,
    pub primitives: LoadReport,
}

/// Assemble a fully wired `Environment`: register universal capabilities
/// and the stdlib primitives, attach the `rhai` dynamic primitive
/// compiler, then load `root/objects/*.md` and verify `root/primitives/
/// *.rhai`.
pub async fn build_environment(
    root: PathBuf,
    store: Arc<dyn ThreadStore>,
    bus: Arc<MessageBus>,
    llm: LlmRegistry,
    default_model: impl Into<String>,
) -> EngineResult<(Arc<Environment>, BootReport)> {
    let env = Environment::new(store, bus, llm, default_model, root.clone());

    po_core::register_universal_capabilities(&env.registry)?;
    register_stdlib(&env.registry)?;

    let env = env.with_primitive_compiler(Arc::new(RhaiPrimitiveCompiler::new()));

    let prompt_objects = load_prompt_objects(&root, &env.registry).await?;
    for error in &prompt_objects.errors {
        warn!(path = %error.path.display(), error = %error.message, "skipped malformed prompt object");
    }

    let compiler = env
        .primitive_compiler
        .as_deref()
        .expect("primitive compiler is always wired by build_environment");
    let primitives = verify_primitive_sources(&root, compiler).await?;
    for error in &primitives.errors {
        warn!(path = %error.path.display(), error = %error.message, "skipped malformed primitive source");
    }

    Ok((env, BootReport { prompt_objects, primitives }))
}
