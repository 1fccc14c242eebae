// Usage aggregation (spec §3 "Aggregations: per-session, per-tree... by
// model"). The teacher has no recursive-CTE precedent for this; per
// SPEC_FULL.md's grounding note the tree sum is folded in Rust: fetch child
// session ids and recurse rather than attempting a single recursive SQL query.

use std::collections::HashMap;

use sqlx::SqlitePool;
use uuid::Uuid;

use po_core::{SessionUsage, UsageTotals};

use crate::error::StoreResult;
use crate::models::MessageRow;

pub async fn session_usage(pool: &SqlitePool, session_id: Uuid) -> StoreResult<SessionUsage> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT id, session_id, role, content, from_po, tool_calls, tool_results, usage, source, created_at
        FROM messages
        WHERE session_id = ? AND role = 'assistant' AND usage IS NOT NULL
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut out = SessionUsage::default();
    for row in rows {
        let message = row.into_message()?;
        if let Some(usage) = message.usage {
            let entry = out.by_model.entry(usage.model.clone()).or_default();
            let totals = UsageTotals {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cache_creation_tokens: usage.cache_creation_tokens.unwrap_or(0),
                cache_read_tokens: usage.cache_read_tokens.unwrap_or(0),
            };
            entry.add(&totals);
            out.total.add(&totals);
        }
    }
    Ok(out)
}

pub async fn thread_tree_usage(pool: &SqlitePool, session_id: Uuid) -> StoreResult<SessionUsage> {
    let mut total = session_usage(pool, session_id).await?;

    let child_ids: Vec<String> = sqlx::query_scalar("SELECT id FROM sessions WHERE parent_session_id = ?")
        .bind(session_id.to_string())
        .fetch_all(pool)
        .await?;

    for child_id in child_ids {
        let Ok(child_id) = Uuid::parse_str(&child_id) else {
            continue;
        };
        let child_usage = Box::pin(thread_tree_usage(pool, child_id)).await?;
        total.total.add(&child_usage.total);
        for (model, totals) in child_usage.by_model {
            total.by_model.entry(model).or_default().add(&totals);
        }
    }

    Ok(total)
}
