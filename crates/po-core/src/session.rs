// Session (a.k.a. Thread) domain types (spec §3 "Session")

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag on a session indicating which front-end created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Tui,
    Mcp,
    Web,
    Api,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Tui => write!(f, "tui"),
            Source::Mcp => write!(f, "mcp"),
            Source::Web => write!(f, "web"),
            Source::Api => write!(f, "api"),
        }
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        match s {
            "tui" => Source::Tui,
            "mcp" => Source::Mcp,
            "web" => Source::Web,
            _ => Source::Api,
        }
    }
}

/// Position of a session in a delegation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadType {
    Root,
    Delegation,
    Fork,
    Continuation,
}

impl std::fmt::Display for ThreadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadType::Root => write!(f, "root"),
            ThreadType::Delegation => write!(f, "delegation"),
            ThreadType::Fork => write!(f, "fork"),
            ThreadType::Continuation => write!(f, "continuation"),
        }
    }
}

/// An ordered message history scoped to a single PO instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub po_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_po: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<Uuid>,
    pub thread_type: ThreadType,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new_root(po_name: impl Into<String>, source: Source) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            po_name: po_name.into(),
            name: None,
            source,
            last_message_source: None,
            parent_session_id: None,
            parent_po: None,
            parent_message_id: None,
            thread_type: ThreadType::Root,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct a delegation child per spec §4.5: linked to the parent
    /// session and PO, first-class `thread_type = delegation`.
    pub fn new_delegation(
        po_name: impl Into<String>,
        parent_session_id: Uuid,
        parent_po: impl Into<String>,
        parent_message_id: Uuid,
        source: Source,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            po_name: po_name.into(),
            name: None,
            source,
            last_message_source: None,
            parent_session_id: Some(parent_session_id),
            parent_po: Some(parent_po.into()),
            parent_message_id: Some(parent_message_id),
            thread_type: ThreadType::Delegation,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_session_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_session_has_no_parent() {
        let s = Session::new_root("greeter", Source::Api);
        assert!(s.is_root());
        assert_eq!(s.thread_type, ThreadType::Root);
    }

    #[test]
    fn delegation_session_links_to_parent() {
        let parent = Session::new_root("coordinator", Source::Api);
        let msg_id = Uuid::now_v7();
        let child =
            Session::new_delegation("reader", parent.id, "coordinator", msg_id, parent.source);
        assert_eq!(child.parent_session_id, Some(parent.id));
        assert_eq!(child.thread_type, ThreadType::Delegation);
        assert!(!child.is_root());
    }
}
