// Message types (spec §3 "Message")
//
// One row in a session's ordered log. Role-specific fields are all optional
// on the struct (rather than an enum-of-structs) to mirror
// `everruns-core`'s flat `Message` shape and keep the storage mapping
// trivial.

use crate::session::Source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s {
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }
}

/// A tool call emitted by an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a `role=tool` message's `tool_results` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
}

/// Per-assistant-message accounting (spec §3 "Usage record").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    pub model: String,
    pub provider: String,
}

/// A message in a session's ordered log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,

    /// user/assistant text content. Assistant content may be absent when the
    /// turn produced only tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Set on a `user` message when it was delegated from another PO rather
    /// than typed by a human.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_po: Option<String>,

    /// Set on `assistant` messages that requested capability invocations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Set on `tool` messages bundling every result for the preceding
    /// assistant message's tool_calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultEntry>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub source: Source,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(session_id: Uuid, content: impl Into<String>, source: Source) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            role: MessageRole::User,
            content: Some(content.into()),
            from_po: None,
            tool_calls: None,
            tool_results: None,
            usage: None,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn delegated_user(
        session_id: Uuid,
        content: impl Into<String>,
        from_po: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            from_po: Some(from_po.into()),
            ..Message::user(session_id, content, source)
        }
    }

    pub fn assistant(
        session_id: Uuid,
        content: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
        usage: Option<Usage>,
        source: Source,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            role: MessageRole::Assistant,
            content,
            from_po: None,
            tool_calls,
            tool_results: None,
            usage,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn tool(session_id: Uuid, tool_results: Vec<ToolResultEntry>, source: Source) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            role: MessageRole::Tool,
            content: None,
            from_po: None,
            tool_calls: None,
            tool_results: Some(tool_results),
            usage: None,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_carries_text() {
        let sid = Uuid::now_v7();
        let msg = Message::user(sid, "hey there", Source::Api);
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content.as_deref(), Some("hey there"));
        assert!(msg.from_po.is_none());
    }

    #[test]
    fn delegated_message_carries_from_po() {
        let sid = Uuid::now_v7();
        let msg = Message::delegated_user(sid, "{}", "coordinator", Source::Api);
        assert_eq!(msg.from_po.as_deref(), Some("coordinator"));
    }

    #[test]
    fn tool_message_bundles_results() {
        let sid = Uuid::now_v7();
        let entry = ToolResultEntry {
            tool_call_id: "call_1".into(),
            name: "list_files".into(),
            content: "[\"a.rs\"]".into(),
        };
        let msg = Message::tool(sid, vec![entry], Source::Api);
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_results.unwrap().len(), 1);
    }
}
