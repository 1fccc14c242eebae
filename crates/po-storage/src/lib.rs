// SQLite-backed Thread Store

pub mod error;
pub mod export;
pub mod models;
pub mod schema;
pub mod search;
pub mod store;
pub mod usage;

pub use error::{StoreError, StoreResult};
pub use store::{SqliteThreadStore, StoreEventSink};
