//! Storage layer for WikiDraft
//!
//! Provides:
//! - Record models (entities, notability, drafts, articles)
//! - JSON-lines file stores, one per collection
//! - Repository with per-entity locking for read-modify-write sequences

pub mod models;
mod repository;
mod store;

pub use repository::{CascadeReport, EntityGuard, Repository};
pub use store::FileStore;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

/// A record persisted in a keyed collection
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name; also the file stem on disk
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    /// Normalize a legacy on-disk layout in place before decoding.
    /// Returns true when the value changed.
    fn migrate(_value: &mut Value) -> bool {
        false
    }
}

/// Backfill missing `created_at` / `updated_at` and give naive timestamps
/// a UTC offset. Returns true when anything changed.
pub(crate) fn normalize_timestamps(obj: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    for field in ["created_at", "updated_at"] {
        let replacement = match obj.get(field) {
            Some(Value::String(raw)) if DateTime::parse_from_rfc3339(raw).is_ok() => None,
            Some(Value::String(raw)) => Some(
                raw.parse::<NaiveDateTime>()
                    .map(|naive| naive.and_utc())
                    .unwrap_or_else(|_| Utc::now()),
            ),
            _ => Some(Utc::now()),
        };
        if let Some(timestamp) = replacement {
            obj.insert(field.to_string(), Value::String(timestamp.to_rfc3339()));
            changed = true;
        }
    }
    changed
}
