// Per-invocation context threaded through `Capability::receive` (spec §4.3:
// "context (carries session ID, caller PO name if any, cancellation token,
// streaming sink)").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::environment::Environment;
use crate::session::Source;

/// Cooperative cancellation handle (spec §5). Checked between loop
/// iterations and before awaiting I/O; a primitive mid-syscall may still
/// complete before it's observed.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Identifies the PO and assistant message a delegation call came from.
#[derive(Clone)]
pub struct DelegationCaller {
    pub po_name: String,
    pub session_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Clone)]
pub struct TurnContext {
    pub env: Arc<Environment>,
    /// The active session, if one is already known. `None` means "resolve
    /// or create one for this PO" (spec §4.3 step 1).
    pub session_id: Option<Uuid>,
    pub caller: Option<DelegationCaller>,
    pub source: Source,
    pub cancellation: CancellationToken,
    /// Name of the PO whose turn is currently executing. Distinct from
    /// `caller` (the PO that *delegated in*, if any) — universal
    /// capabilities like `store_env_data`/`modify_prompt` need this to
    /// attribute writes to the invoking PO.
    pub calling_po: Option<String>,
}

impl TurnContext {
    pub fn top_level(env: Arc<Environment>, source: Source) -> Self {
        Self {
            env,
            session_id: None,
            caller: None,
            source,
            cancellation: CancellationToken::new(),
            calling_po: None,
        }
    }

    pub fn top_level_in_session(env: Arc<Environment>, session_id: Uuid, source: Source) -> Self {
        Self {
            env,
            session_id: Some(session_id),
            caller: None,
            source,
            cancellation: CancellationToken::new(),
            calling_po: None,
        }
    }

    /// Build the sub-context a delegation call runs in (spec §4.5): a fresh
    /// session is always requested, inheriting the parent's cancellation
    /// token so cancelling the parent recursively cancels the child.
    pub fn for_delegation(&self, caller: DelegationCaller) -> Self {
        Self {
            env: self.env.clone(),
            session_id: None,
            caller: Some(caller),
            source: self.source,
            cancellation: self.cancellation.clone(),
            calling_po: None,
        }
    }

    pub fn is_delegation(&self) -> bool {
        self.caller.is_some()
    }

    /// Sub-context for a primitive/universal invocation: same session,
    /// attributed to the PO whose turn is invoking it.
    pub fn for_same_session(&self, session_id: Uuid, calling_po: impl Into<String>) -> Self {
        Self {
            env: self.env.clone(),
            session_id: Some(session_id),
            caller: self.caller.clone(),
            source: self.source,
            cancellation: self.cancellation.clone(),
            calling_po: Some(calling_po.into()),
        }
    }
}
