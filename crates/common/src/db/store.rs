//! JSON-lines record store
//!
//! One file per collection: a `#` comment header followed by one JSON object
//! per line, keyed by its `id`. The map is loaded when the store opens and
//! every mutation rewrites the file through a temp file and a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::Record;
use crate::errors::{AppError, Result};

/// Keyed persistent collection of `T`
pub struct FileStore<T: Record> {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<String, T>>,
}

impl<T: Record> FileStore<T> {
    /// Open (or create) the collection file inside `dir`
    pub async fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(format!("{}.jsonl", T::COLLECTION));
        let (records, migrated) = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => parse_lines::<T>(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (BTreeMap::new(), false),
            Err(e) => {
                return Err(AppError::Storage {
                    message: format!("Failed to read {}: {}", path.display(), e),
                })
            }
        };

        info!(
            collection = T::COLLECTION,
            count = records.len(),
            path = %path.display(),
            "Record store opened"
        );

        let store = Self {
            path: Some(path),
            records: Mutex::new(records),
        };

        if migrated {
            info!(collection = T::COLLECTION, "Rewriting store after legacy normalization");
            {
                let records = store.records.lock().await;
                store.persist(&records).await?;
            }
        }

        Ok(store)
    }

    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.records.lock().await.contains_key(id)
    }

    pub async fn list(&self) -> Vec<T> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Records matching a predicate
    pub async fn filter(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    /// Insert a new record; fails if the id is taken
    pub async fn insert(&self, record: T) -> Result<T> {
        let mut records = self.records.lock().await;
        if records.contains_key(record.id()) {
            return Err(AppError::conflict(format!(
                "{} record {} already exists",
                T::COLLECTION,
                record.id()
            )));
        }
        let id = record.id().to_string();
        records.insert(id.clone(), record.clone());
        if let Err(e) = self.persist(&records).await {
            records.remove(&id);
            return Err(e);
        }
        Ok(record)
    }

    /// Insert or replace; returns the previous record
    pub async fn upsert(&self, record: T) -> Result<Option<T>> {
        let mut records = self.records.lock().await;
        let id = record.id().to_string();
        let previous = records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            restore(&mut records, id, previous);
            return Err(e);
        }
        Ok(previous)
    }

    /// Mutate a copy of the record and keep it once persisted; `None` when absent
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Result<Option<R>> {
        let mut records = self.records.lock().await;
        let Some(current) = records.get(id) else {
            return Ok(None);
        };
        let mut next = current.clone();
        let out = f(&mut next);
        let previous = records.insert(id.to_string(), next);
        if let Err(e) = self.persist(&records).await {
            restore(&mut records, id.to_string(), previous);
            return Err(e);
        }
        Ok(Some(out))
    }

    pub async fn remove(&self, id: &str) -> Result<Option<T>> {
        let mut records = self.records.lock().await;
        let Some(removed) = records.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&records).await {
            records.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    async fn persist(&self, records: &BTreeMap<String, T>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut contents = format!(
            "# {} store - id -> record (one JSON object per line)\n",
            T::COLLECTION
        );
        for record in records.values() {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }

        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, contents).await.map_err(|e| AppError::Storage {
            message: format!("Failed to write {}: {}", tmp.display(), e),
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| AppError::Storage {
            message: format!("Failed to replace {}: {}", path.display(), e),
        })?;

        debug!(collection = T::COLLECTION, count = records.len(), "Store persisted");
        Ok(())
    }
}

/// Put back what a failed write replaced
fn restore<T>(records: &mut BTreeMap<String, T>, id: String, previous: Option<T>) {
    match previous {
        Some(record) => {
            records.insert(id, record);
        }
        None => {
            records.remove(&id);
        }
    }
}

/// Parse file contents; the flag reports whether any record was migrated
fn parse_lines<T: Record>(contents: &str) -> (BTreeMap<String, T>, bool) {
    let mut records = BTreeMap::new();
    let mut migrated = false;

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(collection = T::COLLECTION, line = lineno + 1, error = %e, "Skipping undecodable line");
                continue;
            }
        };

        if value.get("id").and_then(Value::as_str).is_none() {
            warn!(collection = T::COLLECTION, line = lineno + 1, "Skipping record without id");
            continue;
        }

        migrated |= T::migrate(&mut value);

        match serde_json::from_value::<T>(value) {
            Ok(record) => {
                records.insert(record.id().to_string(), record);
            }
            Err(e) => {
                warn!(collection = T::COLLECTION, line = lineno + 1, error = %e, "Skipping invalid record");
            }
        }
    }

    (records, migrated)
}
