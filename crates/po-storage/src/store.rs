// SqliteThreadStore: the `po_core::ThreadStore` implementation (spec §4.6).
//
// Grounded on `everruns-storage::repositories::Database` (pool wrapper +
// `query_as::<_, Row>` per operation) and `everruns-storage::session_store`
// (thin trait impl translating Row -> domain type). Writers serialize
// through `write_lock` (spec §4.6 "writers serialize through a single
// connection or a write mutex"); reads run concurrently against the WAL pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use po_core::{
    BusEvent, EngineError, EngineResult, EnvDataEntry, EnvDataSummary, Message, Session,
    SessionUpdate, SessionUsage, Source, ThreadStore, ThreadTree,
};

use crate::error::StoreResult;
use crate::models::{EnvDataRow, EventRow, MessageRow, SessionRow};
use crate::{export, schema, search, usage};

pub struct SqliteThreadStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteThreadStore {
    /// Open (creating if absent) the sqlite file at `path`, enabling WAL
    /// mode for concurrent readers (spec §4.6), and applying migrations.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Arc<Self>> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;

        Ok(Arc::new(Self {
            pool,
            write_lock: Mutex::new(()),
        }))
    }

    /// In-memory store for tests — a fresh schema, no file on disk.
    pub async fn open_in_memory() -> StoreResult<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        schema::migrate(&pool).await?;
        Ok(Arc::new(Self {
            pool,
            write_lock: Mutex::new(()),
        }))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn touch_session(&self, id: Uuid, source: Source) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET updated_at = ?, last_message_source = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(source.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_err(e: crate::error::StoreError) -> EngineError {
    e.into()
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn create_session(&self, session: Session) -> EngineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let row = SessionRow::from_session(&session);
        sqlx::query(
            r#"
            INSERT INTO sessions (id, po_name, name, source, last_message_source, parent_session_id,
                                   parent_po, parent_message_id, thread_type, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.po_name)
        .bind(&row.name)
        .bind(&row.source)
        .bind(&row.last_message_source)
        .bind(&row.parent_session_id)
        .bind(&row.parent_po)
        .bind(&row.parent_message_id)
        .bind(&row.thread_type)
        .bind(&row.metadata)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> EngineResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, po_name, name, source, last_message_source, parent_session_id,
                   parent_po, parent_message_id, thread_type, metadata, created_at, updated_at
            FROM sessions WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        row.map(|r| r.into_session().map_err(map_err)).transpose()
    }

    async fn get_or_create_session(&self, po_name: &str, source: Source) -> EngineResult<Session> {
        let _guard = self.write_lock.lock().await;
        let existing: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, po_name, name, source, last_message_source, parent_session_id,
                   parent_po, parent_message_id, thread_type, metadata, created_at, updated_at
            FROM sessions WHERE po_name = ? AND parent_session_id IS NULL
            ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .bind(po_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        if let Some(row) = existing {
            return row.into_session().map_err(map_err);
        }

        drop(_guard);
        self.create_session(Session::new_root(po_name, source)).await
    }

    async fn update_session(&self, id: Uuid, update: SessionUpdate) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            UPDATE sessions SET
                name = COALESCE(?, name),
                last_message_source = COALESCE(?, last_message_source),
                metadata = COALESCE(?, metadata),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.name)
        .bind(update.last_message_source.map(|s| s.to_string()))
        .bind(
            update
                .metadata
                .map(|m| serde_json::to_string(&m).unwrap_or_else(|_| "null".to_string())),
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;

        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;
        sqlx::query("DELETE FROM env_data WHERE root_thread_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;

        tx.commit()
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;
        Ok(())
    }

    async fn list_sessions(
        &self,
        po_name: Option<&str>,
        source: Option<Source>,
    ) -> EngineResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, po_name, name, source, last_message_source, parent_session_id,
                   parent_po, parent_message_id, thread_type, metadata, created_at, updated_at
            FROM sessions
            WHERE (?1 IS NULL OR po_name = ?1) AND (?2 IS NULL OR source = ?2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(po_name)
        .bind(source.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| r.into_session().map_err(map_err))
            .collect()
    }

    async fn list_all_sessions(&self, source: Option<Source>) -> EngineResult<Vec<Session>> {
        self.list_sessions(None, source).await
    }

    async fn count_sessions(&self) -> EngineResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)
    }

    async fn add_message(&self, message: Message) -> EngineResult<Uuid> {
        let _guard = self.write_lock.lock().await;
        let row = MessageRow::from_message(&message).map_err(map_err)?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, session_id, role, content, from_po, tool_calls, tool_results, usage, source, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.session_id)
        .bind(&row.role)
        .bind(&row.content)
        .bind(&row.from_po)
        .bind(&row.tool_calls)
        .bind(&row.tool_results)
        .bind(&row.usage)
        .bind(&row.source)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        drop(_guard);
        self.touch_session(message.session_id, message.source)
            .await
            .map_err(map_err)?;
        Ok(message.id)
    }

    async fn get_messages(&self, session_id: Uuid) -> EngineResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, role, content, from_po, tool_calls, tool_results, usage, source, created_at
            FROM messages WHERE session_id = ? ORDER BY created_at ASC
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| r.into_message().map_err(map_err))
            .collect()
    }

    async fn clear_messages(&self, session_id: Uuid) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;
        Ok(())
    }

    async fn count_messages(&self, session_id: Uuid) -> EngineResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)
    }

    async fn get_thread_tree(&self, session_id: Uuid, include_messages: bool) -> EngineResult<ThreadTree> {
        export::build_thread_tree(&self.pool, session_id, include_messages)
            .await
            .map_err(map_err)
    }

    async fn get_thread_lineage(&self, session_id: Uuid) -> EngineResult<Vec<Session>> {
        let mut lineage = Vec::new();
        let mut current = self
            .get_session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        loop {
            let parent_id = current.parent_session_id;
            lineage.push(current.clone());
            match parent_id {
                Some(id) => {
                    current = self.get_session(id).await?.ok_or(EngineError::SessionNotFound(id))?;
                }
                None => break,
            }
        }
        lineage.reverse();
        Ok(lineage)
    }

    async fn resolve_root_thread(&self, session_id: Uuid) -> EngineResult<Uuid> {
        let lineage = self.get_thread_lineage(session_id).await?;
        Ok(lineage.first().map(|s| s.id).unwrap_or(session_id))
    }

    async fn get_child_threads(&self, session_id: Uuid) -> EngineResult<Vec<Session>> {
        self.list_sessions(None, None)
            .await
            .map(|sessions| {
                sessions
                    .into_iter()
                    .filter(|s| s.parent_session_id == Some(session_id))
                    .collect()
            })
    }

    async fn search_sessions(
        &self,
        query: Option<&str>,
        source: Option<Source>,
    ) -> EngineResult<Vec<Session>> {
        search::search_sessions(&self.pool, query, source)
            .await
            .map_err(map_err)
    }

    async fn store_env_data(&self, entry: EnvDataEntry) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO env_data (root_thread_id, key, short_description, value, stored_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (root_thread_id, key) DO UPDATE SET
                short_description = excluded.short_description,
                value = excluded.value,
                stored_by = excluded.stored_by,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.root_thread_id.to_string())
        .bind(&entry.key)
        .bind(&entry.short_description)
        .bind(serde_json::to_string(&entry.value).map_err(|e| EngineError::Internal(e.into()))?)
        .bind(&entry.stored_by)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;
        Ok(())
    }

    async fn update_env_data(
        &self,
        root_thread_id: Uuid,
        key: &str,
        short_description: &str,
        value: serde_json::Value,
        stored_by: &str,
    ) -> EngineResult<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            UPDATE env_data SET short_description = ?, value = ?, stored_by = ?, updated_at = ?
            WHERE root_thread_id = ? AND key = ?
            "#,
        )
        .bind(short_description)
        .bind(serde_json::to_string(&value).map_err(|e| EngineError::Internal(e.into()))?)
        .bind(stored_by)
        .bind(Utc::now())
        .bind(root_thread_id.to_string())
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_env_data(&self, root_thread_id: Uuid, key: &str) -> EngineResult<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM env_data WHERE root_thread_id = ? AND key = ?")
            .bind(root_thread_id.to_string())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(crate::error::StoreError::from)
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_env_data(&self, root_thread_id: Uuid, key: &str) -> EngineResult<Option<EnvDataEntry>> {
        let row: Option<EnvDataRow> = sqlx::query_as(
            r#"
            SELECT root_thread_id, key, short_description, value, stored_by, created_at, updated_at
            FROM env_data WHERE root_thread_id = ? AND key = ?
            "#,
        )
        .bind(root_thread_id.to_string())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        row.map(|r| r.into_entry().map_err(map_err)).transpose()
    }

    async fn list_env_data(&self, root_thread_id: Uuid) -> EngineResult<Vec<EnvDataSummary>> {
        let rows: Vec<EnvDataRow> = sqlx::query_as(
            r#"
            SELECT root_thread_id, key, short_description, value, stored_by, created_at, updated_at
            FROM env_data WHERE root_thread_id = ? ORDER BY updated_at DESC
            "#,
        )
        .bind(root_thread_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| r.into_entry().map(|e| (&e).into()).map_err(map_err))
            .collect()
    }

    async fn export_session_markdown(&self, id: Uuid) -> EngineResult<String> {
        export::export_session_markdown(&self.pool, id).await.map_err(map_err)
    }

    async fn export_session_json(&self, id: Uuid) -> EngineResult<serde_json::Value> {
        export::export_session_json(&self.pool, id).await.map_err(map_err)
    }

    async fn export_thread_tree_markdown(&self, id: Uuid) -> EngineResult<String> {
        export::export_thread_tree_markdown(&self.pool, id).await.map_err(map_err)
    }

    async fn export_thread_tree_json(&self, id: Uuid) -> EngineResult<serde_json::Value> {
        export::export_thread_tree_json(&self.pool, id).await.map_err(map_err)
    }

    async fn session_usage(&self, id: Uuid) -> EngineResult<SessionUsage> {
        usage::session_usage(&self.pool, id).await.map_err(map_err)
    }

    async fn thread_tree_usage(&self, id: Uuid) -> EngineResult<SessionUsage> {
        usage::thread_tree_usage(&self.pool, id).await.map_err(map_err)
    }

    async fn record_event(&self, event: BusEvent) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO events (id, session_id, from_name, to_name, content, summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.session_id.map(|id| id.to_string()))
        .bind(&event.from)
        .bind(&event.to)
        .bind(&event.content)
        .bind(&event.summary)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_events_since(&self, since: DateTime<Utc>) -> EngineResult<Vec<BusEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, from_name, to_name, content, summary, created_at
            FROM events WHERE created_at > ? ORDER BY created_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::StoreError::from)
        .map_err(map_err)?;

        rows.into_iter()
            .map(|r| r.into_bus_event().map_err(map_err))
            .collect()
    }
}

/// Bridges the bus's `EventSink` hook to this store's `events` table (spec
/// §4.8 "hands off to the Thread Store's events table if a store is
/// attached").
pub struct StoreEventSink(pub Arc<SqliteThreadStore>);

#[async_trait]
impl po_core::EventSink for StoreEventSink {
    async fn record_event(&self, event: BusEvent) {
        if let Err(e) = ThreadStore::record_event(self.0.as_ref(), event).await {
            tracing::warn!(error = %e, "failed to persist bus event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use po_core::{Message, Source, ToolCall, ToolResultEntry};

    async fn store() -> Arc<SqliteThreadStore> {
        SqliteThreadStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_session_round_trips() {
        let store = store().await;
        let session = Session::new_root("greeter", Source::Api);
        let created = store.create_session(session.clone()).await.unwrap();
        let fetched = store.get_session(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.po_name, "greeter");
        assert_eq!(fetched.thread_type, po_core::ThreadType::Root);
    }

    #[tokio::test]
    async fn get_or_create_session_reuses_existing_root() {
        let store = store().await;
        let first = store.get_or_create_session("greeter", Source::Api).await.unwrap();
        let second = store.get_or_create_session("greeter", Source::Api).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn add_and_list_messages_preserve_order() {
        let store = store().await;
        let session = store.create_session(Session::new_root("greeter", Source::Api)).await.unwrap();
        store
            .add_message(Message::user(session.id, "hi there", Source::Api))
            .await
            .unwrap();
        store
            .add_message(Message::assistant(
                session.id,
                Some("hello!".into()),
                None,
                None,
                Source::Api,
            ))
            .await
            .unwrap();

        let messages = store.get_messages(session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some("hi there"));
        assert_eq!(messages[1].content.as_deref(), Some("hello!"));
    }

    #[tokio::test]
    async fn search_sessions_is_empty_for_blank_query() {
        let store = store().await;
        let results = store.search_sessions(Some("   "), None).await.unwrap();
        assert!(results.is_empty());
        let results = store.search_sessions(None, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_sessions_finds_matching_message_content() {
        let store = store().await;
        let session = store.create_session(Session::new_root("reader", Source::Api)).await.unwrap();
        store
            .add_message(Message::user(session.id, "please summarize report.pdf", Source::Api))
            .await
            .unwrap();

        let results = store.search_sessions(Some("summarize"), None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, session.id);
    }

    #[tokio::test]
    async fn env_data_store_update_delete_round_trip() {
        let store = store().await;
        let root_id = Uuid::now_v7();
        let entry = po_core::EnvDataEntry {
            root_thread_id: root_id,
            key: "target_file".into(),
            short_description: "file under review".into(),
            value: serde_json::json!("report.pdf"),
            stored_by: "coordinator".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.store_env_data(entry).await.unwrap();

        let fetched = store.get_env_data(root_id, "target_file").await.unwrap().unwrap();
        assert_eq!(fetched.value, serde_json::json!("report.pdf"));

        let updated = store
            .update_env_data(
                root_id,
                "target_file",
                "file under review",
                serde_json::json!("final.pdf"),
                "coordinator",
            )
            .await
            .unwrap();
        assert!(updated);

        let listed = store.list_env_data(root_id).await.unwrap();
        assert_eq!(listed.len(), 1);

        let deleted = store.delete_env_data(root_id, "target_file").await.unwrap();
        assert!(deleted);
        assert!(store.get_env_data(root_id, "target_file").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_env_data_on_missing_key_returns_false() {
        let store = store().await;
        let updated = store
            .update_env_data(Uuid::now_v7(), "nope", "desc", serde_json::json!(1), "x")
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn delegation_thread_tree_nests_children_and_sums_usage() {
        let store = store().await;
        let parent = store
            .create_session(Session::new_root("coordinator", Source::Api))
            .await
            .unwrap();
        let call = ToolCall {
            id: "call_1".into(),
            name: "reader".into(),
            arguments: serde_json::json!({"message": "read this"}),
        };
        let assistant_msg_id = store
            .add_message(Message::assistant(
                parent.id,
                None,
                Some(vec![call]),
                Some(po_core::Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                    cache_creation_tokens: None,
                    cache_read_tokens: None,
                    model: "gpt-5".into(),
                    provider: "openai".into(),
                }),
                Source::Api,
            ))
            .await
            .unwrap();

        let child = store
            .create_session(Session::new_delegation(
                "reader",
                parent.id,
                "coordinator",
                assistant_msg_id,
                Source::Api,
            ))
            .await
            .unwrap();
        store
            .add_message(Message::user(child.id, "read this", Source::Api))
            .await
            .unwrap();
        store
            .add_message(Message::assistant(
                child.id,
                Some("done reading".into()),
                None,
                Some(po_core::Usage {
                    input_tokens: 3,
                    output_tokens: 2,
                    cache_creation_tokens: None,
                    cache_read_tokens: None,
                    model: "gpt-5".into(),
                    provider: "openai".into(),
                }),
                Source::Api,
            ))
            .await
            .unwrap();
        store
            .add_message(Message::tool(
                parent.id,
                vec![ToolResultEntry {
                    tool_call_id: "call_1".into(),
                    name: "reader".into(),
                    content: "done reading".into(),
                }],
                Source::Api,
            ))
            .await
            .unwrap();

        let tree = store.get_thread_tree(parent.id, true).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].session.id, child.id);

        let lineage = store.get_thread_lineage(child.id).await.unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage[0].id, parent.id);

        let root = store.resolve_root_thread(child.id).await.unwrap();
        assert_eq!(root, parent.id);

        let usage = store.thread_tree_usage(parent.id).await.unwrap();
        assert_eq!(usage.total.input_tokens, 13);
        assert_eq!(usage.total.output_tokens, 7);

        let markdown = store.export_thread_tree_markdown(parent.id).await.unwrap();
        let call_pos = markdown.find("calling `reader`").unwrap();
        let child_pos = markdown.find("done reading").unwrap();
        let result_pos = markdown.find("result:").unwrap();
        assert!(call_pos < child_pos && child_pos < result_pos);
    }

    #[tokio::test]
    async fn delete_session_cascades_messages() {
        let store = store().await;
        let session = store.create_session(Session::new_root("greeter", Source::Api)).await.unwrap();
        store
            .add_message(Message::user(session.id, "hi", Source::Api))
            .await
            .unwrap();
        store.delete_session(session.id).await.unwrap();
        assert!(store.get_session(session.id).await.unwrap().is_none());
        assert_eq!(store.count_messages(session.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_event_and_get_events_since() {
        let store = store().await;
        let before = Utc::now() - chrono::Duration::seconds(1);
        let event = BusEvent {
            id: Uuid::now_v7(),
            from: "coordinator".into(),
            to: "reader".into(),
            content: "read this".into(),
            summary: "read this".into(),
            timestamp: Utc::now(),
            session_id: None,
        };
        store.record_event(event).await.unwrap();

        let events = store.get_events_since(before).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, "coordinator");
    }
}
