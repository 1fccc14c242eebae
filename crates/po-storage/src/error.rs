// Storage error taxonomy, grounded on `everruns-core::error`'s thiserror
// pattern (named variants + helper constructors), re-targeted at sqlx/sqlite
// failure modes instead of `everruns-storage`'s Postgres/auth ones.

use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("malformed row data: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        StoreError::Corrupt(msg.into())
    }
}

/// Bridges storage failures into the engine's error taxonomy — `po-core`
/// depends only on `EngineResult`, never on this crate.
impl From<StoreError> for po_core::EngineError {
    fn from(e: StoreError) -> Self {
        po_core::EngineError::store(e.to_string())
    }
}
