use crate::core::{column::Schema, identifiers::DatasetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing an ingested dataset. Row payloads are stored
/// separately, keyed by `(id, row index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    /// Bumped every time the dataset is re-ingested under the same id.
    pub version: u64,
    /// Total number of rows.
    pub size: u64,
    pub schema: Schema,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, schema: Schema, size: u64) -> Self {
        let now = Utc::now();
        Dataset {
            id: DatasetId::new(),
            name: name.into(),
            version: 1,
            size,
            schema,
            created_at: now,
            updated_at: now,
        }
    }
}
