// Schema versioning (spec §4.6 "the store tracks a schema version and
// applies ordered migrations at open"). Hand-rolled rather than sqlx-cli's
// `migrations/` directory, since the store must self-migrate an arbitrary
// on-disk environment directory rather than a fixed project-local database —
// grounded on the ordered-`Vec<(version, sql)>`-applied-in-a-transaction
// idiom used across the pack's own migration runners.

use sqlx::SqlitePool;

use crate::error::StoreResult;

type Migration = (i64, &'static str);

const MIGRATIONS: &[Migration] = &[
    (
        1,
        r#"
        CREATE TABLE sessions (
            id TEXT PRIMARY KEY,
            po_name TEXT NOT NULL,
            name TEXT,
            source TEXT NOT NULL,
            last_message_source TEXT,
            parent_session_id TEXT REFERENCES sessions(id),
            parent_po TEXT,
            parent_message_id TEXT,
            thread_type TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT 'null',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX idx_sessions_parent ON sessions(parent_session_id);
        CREATE INDEX idx_sessions_po_name ON sessions(po_name);

        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            role TEXT NOT NULL,
            content TEXT,
            from_po TEXT,
            tool_calls TEXT,
            tool_results TEXT,
            usage TEXT,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_messages_session ON messages(session_id, created_at);

        CREATE TABLE events (
            id TEXT PRIMARY KEY,
            session_id TEXT,
            from_name TEXT NOT NULL,
            to_name TEXT NOT NULL,
            content TEXT NOT NULL,
            summary TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX idx_events_created_at ON events(created_at);

        CREATE TABLE env_data (
            root_thread_id TEXT NOT NULL,
            key TEXT NOT NULL,
            short_description TEXT NOT NULL,
            value TEXT NOT NULL,
            stored_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (root_thread_id, key)
        );
        "#,
    ),
    (
        2,
        r#"
        CREATE VIRTUAL TABLE messages_fts USING fts5(
            content,
            content = 'messages',
            content_rowid = 'rowid'
        );

        CREATE TRIGGER messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
        END;
        CREATE TRIGGER messages_ad AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
        END;
        CREATE TRIGGER messages_au AFTER UPDATE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
            INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
        END;
        "#,
    ),
];

/// Apply every migration newer than the stored `schema_version`, in order,
/// each inside its own transaction. Safe to call on every open.
pub async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    let mut current = current.unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        current = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migrates_fresh_database_to_latest_version() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().0);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }
}
