//! Rust models matching the database schema.

use chrono::{DateTime, Utc};
use mediastore_common::MediaId;
use serde::{Deserialize, Serialize};

/// A pinned source and the id it was assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaRecord {
    pub media_id: MediaId,
    pub path: String,
    pub pinned_at: DateTime<Utc>,
}

impl MediaRecord {
    /// New record pinned now.
    pub fn new(media_id: MediaId, path: impl Into<String>) -> Self {
        Self {
            media_id,
            path: path.into(),
            pinned_at: Utc::now(),
        }
    }
}

/// Full persisted catalog state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    /// Highest id ever assigned.
    pub max_media_id: MediaId,
    /// Records sorted by id.
    pub records: Vec<MediaRecord>,
}
