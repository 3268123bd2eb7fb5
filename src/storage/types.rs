use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another podkeeper process holds the database
    #[error("Another instance of podkeeper appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Database(err)
    }
}

// ============================================================================
// Object Index
// ============================================================================

/// Per-object attribute names.
///
/// Each kind is stored as its own attribute of the owning object so a feed
/// refresh rewrites the episode data without touching local overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// The last successfully fetched and reconciled `FeedRecord`
    FeedData,
    /// Unix timestamp of the last fetch attempt
    LastChecked,
    /// Local overrides layered over the fetched data (asset ids, post ids)
    ModifiedFeedData,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::FeedData => "feed_data",
            DataKind::LastChecked => "last_checked",
            DataKind::ModifiedFeedData => "modified_feed_data",
        }
    }
}

/// Registry entry mapping application keys to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIndex {
    pub object_id: i64,
    pub title: String,
    /// Every key that has resolved to this object; the creating key is first.
    pub known_keys: Vec<String>,
    /// Content hash of the creating key, also the register map key.
    pub unique_id: String,
    #[serde(default)]
    pub is_hidden: bool,
}

impl ObjectIndex {
    /// The key the object was created with.
    pub fn primary_key(&self) -> &str {
        self.known_keys.first().map(String::as_str).unwrap_or_default()
    }

    /// Records an alias key. Returns `true` if it was not known yet.
    pub fn add_key(&mut self, key: &str) -> bool {
        if key.is_empty() || self.known_keys.iter().any(|k| k == key) {
            return false;
        }
        self.known_keys.push(key.to_string());
        true
    }
}
