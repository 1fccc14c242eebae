// In-process runner, primitive stdlib, and dynamic primitive compiler.
//
// This crate owns every concern `po-core` deliberately keeps abstract
// because it touches process I/O: a `tokio::spawn`-backed runner driving
// the turn loop (grounded on `everruns-worker::inprocess::InProcessRunner`),
// the native stdlib primitives (read_file, list_files, write_file,
// http_get), and the `rhai`-backed compiler for runtime-authored
// primitives.

pub mod boot;
pub mod primitives;
pub mod rhai_compiler;
pub mod runner;

pub use boot::{build_environment, BootReport};
pub use rhai_compiler::RhaiPrimitiveCompiler;
pub use runner::Runner;
