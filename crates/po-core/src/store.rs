// Thread Store contract (spec §4.6). `po-core` declares the trait;
// `po-storage` provides the SQLite-backed implementation. Keeping the trait
// here (rather than in the storage crate) lets `Environment`/`Dispatcher`
// depend on an abstract store the way `everruns-core`'s `AgentLoop` depends
// on `MessageStore`/`SessionStore` traits instead of a concrete `Database`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::BusEvent;
use crate::env_data::{EnvDataEntry, EnvDataSummary};
use crate::error::EngineResult;
use crate::message::Message;
use crate::session::{Session, Source};

/// `get_thread_tree` result: a session, optionally its messages, and every
/// delegation child recursively (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadTree {
    pub session: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    pub children: Vec<ThreadTree>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl UsageTotals {
    pub fn add(&mut self, other: &UsageTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

/// Per-session or per-tree usage, broken down by model (spec §3 "Usage
/// record" aggregations, §8 sum invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUsage {
    pub total: UsageTotals,
    pub by_model: std::collections::HashMap<String, UsageTotals>,
}

/// Partial update for `sessions` — only fields present are written.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub name: Option<String>,
    pub last_message_source: Option<Source>,
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    // -- Session CRUD --
    async fn create_session(&self, session: Session) -> EngineResult<Session>;
    async fn get_session(&self, id: Uuid) -> EngineResult<Option<Session>>;
    async fn get_or_create_session(&self, po_name: &str, source: Source) -> EngineResult<Session>;
    async fn update_session(&self, id: Uuid, update: SessionUpdate) -> EngineResult<()>;
    /// Cascades to that session's messages and, if it is a root thread, the
    /// env data scoped to it.
    async fn delete_session(&self, id: Uuid) -> EngineResult<()>;
    async fn list_sessions(
        &self,
        po_name: Option<&str>,
        source: Option<Source>,
    ) -> EngineResult<Vec<Session>>;
    async fn list_all_sessions(&self, source: Option<Source>) -> EngineResult<Vec<Session>>;
    async fn count_sessions(&self) -> EngineResult<i64>;

    // -- Message CRUD --
    async fn add_message(&self, message: Message) -> EngineResult<Uuid>;
    async fn get_messages(&self, session_id: Uuid) -> EngineResult<Vec<Message>>;
    async fn clear_messages(&self, session_id: Uuid) -> EngineResult<()>;
    async fn count_messages(&self, session_id: Uuid) -> EngineResult<i64>;

    // -- Thread queries --
    async fn get_thread_tree(&self, session_id: Uuid, include_messages: bool) -> EngineResult<ThreadTree>;
    async fn get_thread_lineage(&self, session_id: Uuid) -> EngineResult<Vec<Session>>;
    async fn resolve_root_thread(&self, session_id: Uuid) -> EngineResult<Uuid>;
    async fn get_child_threads(&self, session_id: Uuid) -> EngineResult<Vec<Session>>;

    // -- Search --
    /// Empty or absent query returns an empty list (spec §8).
    async fn search_sessions(
        &self,
        query: Option<&str>,
        source: Option<Source>,
    ) -> EngineResult<Vec<Session>>;

    // -- Env data --
    async fn store_env_data(&self, entry: EnvDataEntry) -> EngineResult<()>;
    /// Returns `false` without writing when `(root_thread_id, key)` is absent.
    async fn update_env_data(
        &self,
        root_thread_id: Uuid,
        key: &str,
        short_description: &str,
        value: serde_json::Value,
        stored_by: &str,
    ) -> EngineResult<bool>;
    /// Returns `false` when the key was already absent.
    async fn delete_env_data(&self, root_thread_id: Uuid, key: &str) -> EngineResult<bool>;
    async fn get_env_data(&self, root_thread_id: Uuid, key: &str) -> EngineResult<Option<EnvDataEntry>>;
    async fn list_env_data(&self, root_thread_id: Uuid) -> EngineResult<Vec<EnvDataSummary>>;

    // -- Exports --
    async fn export_session_markdown(&self, id: Uuid) -> EngineResult<String>;
    async fn export_session_json(&self, id: Uuid) -> EngineResult<serde_json::Value>;
    async fn export_thread_tree_markdown(&self, id: Uuid) -> EngineResult<String>;
    async fn export_thread_tree_json(&self, id: Uuid) -> EngineResult<serde_json::Value>;

    // -- Usage --
    async fn session_usage(&self, id: Uuid) -> EngineResult<SessionUsage>;
    async fn thread_tree_usage(&self, id: Uuid) -> EngineResult<SessionUsage>;

    // -- Events (connector catch-up, spec §4.9) --
    async fn record_event(&self, event: BusEvent) -> EngineResult<()>;
    async fn get_events_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<BusEvent>>;
}
