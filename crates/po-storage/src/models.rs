// Row <-> domain type mapping, grounded on `everruns-storage::session_store`'s
// "separate Row struct, manual field-by-field conversion" pattern. UUIDs and
// timestamps round-trip through SQLite as TEXT (RFC3339 / stringified UUID)
// rather than via sqlx's sqlite UUID blob encoding, so the database stays
// human-inspectable with a plain `sqlite3` shell.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use po_core::{Message, MessageRole, Session, Source, ThreadType, ToolCall, ToolResultEntry, Usage};

use crate::error::{StoreError, StoreResult};

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::corrupt(format!("invalid uuid '{s}': {e}")))
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub po_name: String,
    pub name: Option<String>,
    pub source: String,
    pub last_message_source: Option<String>,
    pub parent_session_id: Option<String>,
    pub parent_po: Option<String>,
    pub parent_message_id: Option<String>,
    pub thread_type: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn from_session(s: &Session) -> Self {
        Self {
            id: s.id.to_string(),
            po_name: s.po_name.clone(),
            name: s.name.clone(),
            source: s.source.to_string(),
            last_message_source: s.last_message_source.map(|s| s.to_string()),
            parent_session_id: s.parent_session_id.map(|id| id.to_string()),
            parent_po: s.parent_po.clone(),
            parent_message_id: s.parent_message_id.map(|id| id.to_string()),
            thread_type: s.thread_type.to_string(),
            metadata: serde_json::to_string(&s.metadata).unwrap_or_else(|_| "null".to_string()),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }

    pub fn into_session(self) -> StoreResult<Session> {
        Ok(Session {
            id: parse_uuid(&self.id)?,
            po_name: self.po_name,
            name: self.name,
            source: Source::from(self.source.as_str()),
            last_message_source: self.last_message_source.as_deref().map(Source::from),
            parent_session_id: self.parent_session_id.as_deref().map(parse_uuid).transpose()?,
            parent_po: self.parent_po,
            parent_message_id: self
                .parent_message_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            thread_type: thread_type_from_str(&self.thread_type),
            metadata: serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn thread_type_from_str(s: &str) -> ThreadType {
    match s {
        "delegation" => ThreadType::Delegation,
        "fork" => ThreadType::Fork,
        "continuation" => ThreadType::Continuation,
        _ => ThreadType::Root,
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: Option<String>,
    pub from_po: Option<String>,
    pub tool_calls: Option<String>,
    pub tool_results: Option<String>,
    pub usage: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn from_message(m: &Message) -> StoreResult<Self> {
        Ok(Self {
            id: m.id.to_string(),
            session_id: m.session_id.to_string(),
            role: m.role.to_string(),
            content: m.content.clone(),
            from_po: m.from_po.clone(),
            tool_calls: m
                .tool_calls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::corrupt(e.to_string()))?,
            tool_results: m
                .tool_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::corrupt(e.to_string()))?,
            usage: m
                .usage
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::corrupt(e.to_string()))?,
            source: m.source.to_string(),
            created_at: m.created_at,
        })
    }

    pub fn into_message(self) -> StoreResult<Message> {
        let tool_calls: Option<Vec<ToolCall>> = self
            .tool_calls
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::corrupt(e.to_string()))?;
        let tool_results: Option<Vec<ToolResultEntry>> = self
            .tool_results
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::corrupt(e.to_string()))?;
        let usage: Option<Usage> = self
            .usage
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::corrupt(e.to_string()))?;

        Ok(Message {
            id: parse_uuid(&self.id)?,
            session_id: parse_uuid(&self.session_id)?,
            role: role_from_str(&self.role),
            content: self.content,
            from_po: self.from_po,
            tool_calls,
            tool_results,
            usage,
            source: Source::from(self.source.as_str()),
            created_at: self.created_at,
        })
    }
}

fn role_from_str(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EnvDataRow {
    pub root_thread_id: String,
    pub key: String,
    pub short_description: String,
    pub value: String,
    pub stored_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnvDataRow {
    pub fn into_entry(self) -> StoreResult<po_core::EnvDataEntry> {
        Ok(po_core::EnvDataEntry {
            root_thread_id: parse_uuid(&self.root_thread_id)?,
            key: self.key,
            short_description: self.short_description,
            value: serde_json::from_str(&self.value)
                .map_err(|e| StoreError::corrupt(e.to_string()))?,
            stored_by: self.stored_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: String,
    pub session_id: Option<String>,
    pub from_name: String,
    pub to_name: String,
    pub content: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub fn into_bus_event(self) -> StoreResult<po_core::BusEvent> {
        Ok(po_core::BusEvent {
            id: parse_uuid(&self.id)?,
            from: self.from_name,
            to: self.to_name,
            content: self.content,
            summary: self.summary,
            timestamp: self.created_at,
            session_id: self.session_id.as_deref().map(parse_uuid).transpose()?,
        })
    }
}
