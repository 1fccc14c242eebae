// Environment data: shared key-value storage scoped to a delegation tree's
// root thread (spec §3 "Environment Data entry", §4.5 stigmergic coordination).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One `(root_thread_id, key)` entry. `value` is omitted from listing
/// responses on purpose — see `EnvDataSummary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvDataEntry {
    pub root_thread_id: Uuid,
    pub key: String,
    pub short_description: String,
    pub value: serde_json::Value,
    pub stored_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing projection that withholds `value` to keep LLM context windows
/// small (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvDataSummary {
    pub key: String,
    pub short_description: String,
    pub stored_by: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&EnvDataEntry> for EnvDataSummary {
    fn from(e: &EnvDataEntry) -> Self {
        Self {
            key: e.key.clone(),
            short_description: e.short_description.clone(),
            stored_by: e.stored_by.clone(),
            updated_at: e.updated_at,
        }
    }
}
