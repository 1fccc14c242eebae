// PromptObjects core
//
// DB-agnostic, LLM-agnostic domain types and the turn loop that drives
// prompt object execution (LLM call -> tool dispatch -> repeat).
//
// Key design decisions:
// - Traits (ThreadStore, LlmProvider, EventSink, Subscriber) keep the
//   dispatcher independent of any concrete storage or LLM backend.
// - Every invocable thing (stdlib primitive, compiled primitive, prompt
//   object, universal capability) implements one `Capability` trait and is
//   resolved by name through a `Registry` — no direct object references.
// - `Environment` is the one value carrying shared state; no globals.
// - Cancellation is cooperative, checked at loop and tool-call boundaries.

pub mod bus;
pub mod capability;
pub mod config;
pub mod dispatcher;
pub mod env_data;
pub mod environment;
pub mod error;
pub mod human;
pub mod llm;
pub mod loader;
pub mod message;
pub mod primitive;
pub mod prompt_object;
pub mod registry;
pub mod session;
pub mod store;
pub mod turn;
pub mod universal;

pub use bus::{BusEvent, EventSink, MessageBus, PoStatus, Subscriber};
pub use capability::{extract_message, Capability, CapabilityDescriptor, CapabilityKind, CapabilityOutput};
pub use config::{PromptObjectConfig, PromptObjectFile, WatchesEnvData};
pub use dispatcher::{run_turn, PoHandle};
pub use env_data::{EnvDataEntry, EnvDataSummary};
pub use environment::Environment;
pub use error::{EngineError, EngineResult};
pub use human::{HumanOutcome, HumanQueue, HumanRequest, HumanRequestState};
pub use llm::{
    LlmCallConfig, LlmChunkStream, LlmMessage, LlmMessageRole, LlmProvider, LlmRegistry,
    LlmResponse, LlmStreamEvent,
};
pub use loader::{load_prompt_objects, parse_po_file, render_po_file, verify_primitive_sources, LoadError, LoadReport};
pub use message::{Message, MessageRole, ToolCall, ToolResultEntry, Usage};
pub use primitive::{PrimitiveCapability, PrimitiveCompiler, PrimitiveFn, PrimitiveOrigin};
pub use prompt_object::PromptObjectCapability;
pub use registry::Registry;
pub use session::{Session, Source, ThreadType};
pub use store::{SessionUpdate, SessionUsage, ThreadStore, ThreadTree, UsageTotals};
pub use turn::{CancellationToken, DelegationCaller, TurnContext};
pub use universal::register_all as register_universal_capabilities;
