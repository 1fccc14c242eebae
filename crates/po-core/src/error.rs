// Error taxonomy for the engine (spec §7)

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors that can occur anywhere in the dispatch loop or its collaborators
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed frontmatter, duplicate PO name, unreadable file. Fatal at
    /// boot; reload errors surface to the caller of `reload_po`.
    #[error("config error: {0}")]
    Config(String),

    /// Capability name unknown at dispatch time. Surfaced as a structured
    /// tool-result; the turn continues.
    #[error("unknown capability: {0}")]
    Resolution(String),

    /// A primitive or universal capability raised while executing.
    #[error("capability '{name}' failed: {message}")]
    Capability { name: String, message: String },

    /// Transport/decode/auth failure from the LLM adapter.
    #[error("llm error: {0}")]
    Llm(String),

    /// I/O or constraint failure in the thread store.
    #[error("store error: {0}")]
    Store(String),

    /// The human rejected or cancelled an ask_human.
    #[error("human request {0} cancelled")]
    HumanCancelled(Uuid),

    /// Cooperative cancellation via the turn's cancellation token.
    #[error("turn cancelled")]
    Cancelled,

    /// Loop terminated due to max iterations
    #[error("max iterations ({0}) reached")]
    MaxIterationsReached(usize),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("prompt object not found: {0}")]
    PromptObjectNotFound(String),

    #[error("human request already resolved: {0}")]
    AlreadyResolved(Uuid),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn resolution(name: impl Into<String>) -> Self {
        EngineError::Resolution(name.into())
    }

    pub fn capability(name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Capability {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        EngineError::Llm(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        EngineError::Store(msg.into())
    }

    /// Every error crossing the turn boundary renders as a plain message —
    /// never a raw stack trace over the wire (spec §7).
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
