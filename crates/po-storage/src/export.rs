// Markdown/JSON export (spec §4.6 exports + "thread-tree export layout
// rule"). Grounded on `everruns-core::message`'s flat role/content shape;
// rendering is new: `everruns-everruns` has no transcript-export feature.

use sqlx::SqlitePool;
use uuid::Uuid;

use po_core::{Message, MessageRole, Session, ThreadTree};

use crate::error::StoreResult;
use crate::models::{MessageRow, SessionRow};

/// Tool results longer than this are rendered truncated (spec §4.6).
const TOOL_RESULT_CAP: usize = 10_000;

async fn fetch_session(pool: &SqlitePool, id: Uuid) -> StoreResult<Session> {
    let row: SessionRow = sqlx::query_as(
        r#"
        SELECT id, po_name, name, source, last_message_source, parent_session_id,
               parent_po, parent_message_id, thread_type, metadata, created_at, updated_at
        FROM sessions WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_one(pool)
    .await?;
    row.into_session()
}

async fn fetch_messages(pool: &SqlitePool, id: Uuid) -> StoreResult<Vec<Message>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT id, session_id, role, content, from_po, tool_calls, tool_results, usage, source, created_at
        FROM messages WHERE session_id = ? ORDER BY created_at ASC
        "#,
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(MessageRow::into_message).collect()
}

/// Build `{session, messages?, children: [recursive]}` (spec §4.6
/// `get_thread_tree`).
pub async fn build_thread_tree(
    pool: &SqlitePool,
    id: Uuid,
    include_messages: bool,
) -> StoreResult<ThreadTree> {
    let session = fetch_session(pool, id).await?;
    let messages = if include_messages {
        Some(fetch_messages(pool, id).await?)
    } else {
        None
    };

    let child_ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM sessions WHERE parent_session_id = ? ORDER BY created_at ASC")
            .bind(id.to_string())
            .fetch_all(pool)
            .await?;

    let mut children = Vec::with_capacity(child_ids.len());
    for child_id in child_ids {
        let Ok(child_id) = Uuid::parse_str(&child_id) else {
            continue;
        };
        children.push(Box::pin(build_thread_tree(pool, child_id, include_messages)).await?);
    }

    Ok(ThreadTree {
        session,
        messages,
        children,
    })
}

fn truncate_tool_result(content: &str) -> String {
    if content.chars().count() <= TOOL_RESULT_CAP {
        content.to_string()
    } else {
        let head: String = content.chars().take(TOOL_RESULT_CAP).collect();
        format!("{head}\n... (truncated)")
    }
}

fn render_session_markdown(session: &Session, messages: &[Message]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Session `{}` ({})\n\n", session.id, session.po_name));
    for message in messages {
        match message.role {
            MessageRole::User => {
                let who = message.from_po.as_deref().unwrap_or("user");
                out.push_str(&format!("**{who}:** {}\n\n", message.content.as_deref().unwrap_or("")));
            }
            MessageRole::Assistant => {
                if let Some(content) = &message.content {
                    if !content.is_empty() {
                        out.push_str(&format!("**{}:** {content}\n\n", session.po_name));
                    }
                }
                for call in message.tool_calls.iter().flatten() {
                    out.push_str(&format!(
                        "→ calling `{}` with `{}`\n\n",
                        call.name, call.arguments
                    ));
                }
            }
            MessageRole::Tool => {
                for result in message.tool_results.iter().flatten() {
                    out.push_str(&format!(
                        "← `{}` result: {}\n\n",
                        result.name,
                        truncate_tool_result(&result.content)
                    ));
                }
            }
        }
    }
    out
}

pub async fn export_session_markdown(pool: &SqlitePool, id: Uuid) -> StoreResult<String> {
    let session = fetch_session(pool, id).await?;
    let messages = fetch_messages(pool, id).await?;
    Ok(render_session_markdown(&session, &messages))
}

pub async fn export_session_json(pool: &SqlitePool, id: Uuid) -> StoreResult<serde_json::Value> {
    let session = fetch_session(pool, id).await?;
    let messages = fetch_messages(pool, id).await?;
    Ok(serde_json::json!({ "session": session, "messages": messages }))
}

/// Render a tree, inserting each child's rendered section between the
/// triggering tool_call and its matching tool_result (spec §4.6 "thread-tree
/// export layout rule").
fn render_tree_markdown(tree: &ThreadTree) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Session `{}` ({})\n\n",
        tree.session.id, tree.session.po_name
    ));

    let messages = tree.messages.as_deref().unwrap_or(&[]);
    let mut pending_assistant_id: Option<Uuid> = None;

    for message in messages {
        match message.role {
            MessageRole::User => {
                let who = message.from_po.as_deref().unwrap_or("user");
                out.push_str(&format!("**{who}:** {}\n\n", message.content.as_deref().unwrap_or("")));
            }
            MessageRole::Assistant => {
                if let Some(content) = &message.content {
                    if !content.is_empty() {
                        out.push_str(&format!("**{}:** {content}\n\n", tree.session.po_name));
                    }
                }
                for call in message.tool_calls.iter().flatten() {
                    out.push_str(&format!(
                        "→ calling `{}` with `{}`\n\n",
                        call.name, call.arguments
                    ));
                }
                pending_assistant_id = Some(message.id);
            }
            MessageRole::Tool => {
                for result in message.tool_results.iter().flatten() {
                    if let Some(assistant_id) = pending_assistant_id {
                        if let Some(child) = tree.children.iter().find(|c| {
                            c.session.parent_message_id == Some(assistant_id)
                                && c.session.po_name == result.name
                        }) {
                            out.push_str(&render_tree_markdown(child));
                        }
                    }
                    out.push_str(&format!(
                        "← `{}` result: {}\n\n",
                        result.name,
                        truncate_tool_result(&result.content)
                    ));
                }
            }
        }
    }

    out
}

pub async fn export_thread_tree_markdown(pool: &SqlitePool, id: Uuid) -> StoreResult<String> {
    let tree = build_thread_tree(pool, id, true).await?;
    Ok(render_tree_markdown(&tree))
}

pub async fn export_thread_tree_json(pool: &SqlitePool, id: Uuid) -> StoreResult<serde_json::Value> {
    let tree = build_thread_tree(pool, id, true).await?;
    Ok(serde_json::to_value(tree).unwrap_or_default())
}
