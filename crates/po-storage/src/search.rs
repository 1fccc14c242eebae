// Full-text session search (spec §4.6 "search_sessions... empty/nil query
// returns empty; otherwise FTS-ranked list of sessions containing matching
// messages"), grounded on the `messages_fts` virtual table set up in
// `schema.rs`.

use sqlx::SqlitePool;

use po_core::Source;

use crate::error::StoreResult;
use crate::models::SessionRow;

pub async fn search_sessions(
    pool: &SqlitePool,
    query: Option<&str>,
    source: Option<Source>,
) -> StoreResult<Vec<po_core::Session>> {
    let query = match query.map(str::trim) {
        Some(q) if !q.is_empty() => q,
        _ => return Ok(Vec::new()),
    };

    let sql = r#"
        SELECT DISTINCT s.id, s.po_name, s.name, s.source, s.last_message_source,
               s.parent_session_id, s.parent_po, s.parent_message_id, s.thread_type,
               s.metadata, s.created_at, s.updated_at,
               MIN(bm25(messages_fts)) as rank
        FROM messages_fts
        JOIN messages m ON m.rowid = messages_fts.rowid
        JOIN sessions s ON s.id = m.session_id
        WHERE messages_fts MATCH ?
        AND (?2 IS NULL OR s.source = ?2)
        GROUP BY s.id
        ORDER BY rank ASC
    "#;

    let rows: Vec<SessionRow> = sqlx::query_as(sql)
        .bind(query)
        .bind(source.map(|s| s.to_string()))
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(SessionRow::into_session).collect()
}
