//! Repository over the per-collection record stores
//!
//! Bundles every collection and hands out per-entity locks so that a stage
//! handler's load, mutate and save sequence runs without interleaving with
//! another request for the same entity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::models::{Article, Entity, NotabilityRecord, ResearchDraft, WritingDraft};
use super::FileStore;
use crate::errors::{AppError, Result};

/// Held for the duration of a per-entity read-modify-write sequence
pub type EntityGuard = OwnedMutexGuard<()>;

/// Derived records removed by a cascading delete
#[derive(Debug, Default, Serialize)]
pub struct CascadeReport {
    pub notability: bool,
    pub research_draft: bool,
    pub writing_draft: bool,
    pub article: bool,
}

/// Repository for record access
#[derive(Clone)]
pub struct Repository {
    data_dir: Option<PathBuf>,
    pub entities: Arc<FileStore<Entity>>,
    pub notability: Arc<FileStore<NotabilityRecord>>,
    pub research_drafts: Arc<FileStore<ResearchDraft>>,
    pub writing_drafts: Arc<FileStore<WritingDraft>>,
    pub articles: Arc<FileStore<Article>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Repository {
    /// Open every collection inside `data_dir`, creating it if needed
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| AppError::Storage {
                message: format!("Failed to create {}: {}", data_dir.display(), e),
            })?;

        let repo = Self {
            data_dir: Some(data_dir.to_path_buf()),
            entities: Arc::new(FileStore::open(data_dir).await?),
            notability: Arc::new(FileStore::open(data_dir).await?),
            research_drafts: Arc::new(FileStore::open(data_dir).await?),
            writing_drafts: Arc::new(FileStore::open(data_dir).await?),
            articles: Arc::new(FileStore::open(data_dir).await?),
            locks: Arc::new(DashMap::new()),
        };

        info!(data_dir = %data_dir.display(), "Repository opened");
        Ok(repo)
    }

    /// Repository without backing files
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            entities: Arc::new(FileStore::in_memory()),
            notability: Arc::new(FileStore::in_memory()),
            research_drafts: Arc::new(FileStore::in_memory()),
            writing_drafts: Arc::new(FileStore::in_memory()),
            articles: Arc::new(FileStore::in_memory()),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquire the lock for one entity id
    pub async fn lock(&self, entity_id: &str) -> EntityGuard {
        let mutex = self
            .locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Check that the data directory accepts writes
    pub async fn ping(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let probe = dir.join(".ready");
        tokio::fs::write(&probe, b"ok").await.map_err(|e| AppError::Storage {
            message: format!("Data directory {} not writable: {}", dir.display(), e),
        })?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    // ========================================================================
    // Entity Operations
    // ========================================================================

    pub async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.entities
            .get(id)
            .await
            .ok_or_else(|| AppError::EntityNotFound { id: id.to_string() })
    }

    /// Ensure an empty notability record exists; returns true if created
    pub async fn ensure_notability_record(&self, id: &str) -> Result<bool> {
        if self.notability.contains(id).await {
            return Ok(false);
        }
        self.notability.upsert(NotabilityRecord::new(id)).await?;
        debug!(entity_id = %id, "Created empty notability record");
        Ok(true)
    }

    /// Remove an entity and every record derived from it. Derived records go
    /// first so a failed write leaves the entity in place for a retry.
    pub async fn delete_entity(&self, id: &str) -> Result<CascadeReport> {
        if !self.entities.contains(id).await {
            return Err(AppError::EntityNotFound { id: id.to_string() });
        }

        let report = CascadeReport {
            notability: self.notability.remove(id).await?.is_some(),
            research_draft: self.research_drafts.remove(id).await?.is_some(),
            writing_draft: self.writing_drafts.remove(id).await?.is_some(),
            article: self.articles.remove(id).await?.is_some(),
        };
        self.entities.remove(id).await?;

        info!(entity_id = %id, ?report, "Entity deleted");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{
        ArticleBody, ArticleStatus, EntityCategory, EntityState, EntityStatus, Phase,
    };
    use crate::jobs::JobSet;
    use std::time::Duration;

    async fn seeded() -> Repository {
        let repo = Repository::in_memory();
        repo.entities
            .insert(Entity::new(
                "Jane Doe",
                "Partner at Example Ventures",
                Some(EntityCategory::VentureCapitalist),
                EntityStatus::new(EntityState::Notability, Phase::Completed),
            ))
            .await
            .unwrap();
        repo.ensure_notability_record("jane-doe").await.unwrap();
        repo.research_drafts
            .insert(ResearchDraft::new("jane-doe", EntityCategory::VentureCapitalist, JobSet::default()))
            .await
            .unwrap();
        repo.writing_drafts
            .insert(WritingDraft::new("jane-doe", EntityCategory::VentureCapitalist, JobSet::default()))
            .await
            .unwrap();
        repo.articles
            .insert(Article::new("jane-doe", ArticleStatus::Drafted, ArticleBody::Empty))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_delete_cascades_to_all_stores() {
        let repo = seeded().await;
        let report = repo.delete_entity("jane-doe").await.unwrap();
        assert!(report.notability && report.research_draft && report.writing_draft && report.article);

        assert!(matches!(
            repo.get_entity("jane-doe").await,
            Err(AppError::EntityNotFound { .. })
        ));
        assert!(repo.notability.get("jane-doe").await.is_none());
        assert!(repo.research_drafts.get("jane-doe").await.is_none());
        assert!(repo.writing_drafts.get("jane-doe").await.is_none());
        assert!(repo.articles.get("jane-doe").await.is_none());
    }

    #[tokio::test]
    async fn test_interrupted_delete_keeps_entity_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path()).await.unwrap();
        repo.entities
            .insert(Entity::new(
                "Jane Doe",
                "Partner at Example Ventures",
                None,
                EntityStatus::new(EntityState::Notability, Phase::Completed),
            ))
            .await
            .unwrap();
        repo.ensure_notability_record("jane-doe").await.unwrap();
        repo.articles
            .insert(Article::new("jane-doe", ArticleStatus::Drafted, ArticleBody::Empty))
            .await
            .unwrap();

        // a directory where the temp file goes makes the article write fail
        let blocker = dir.path().join("articles.jsonl.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(matches!(
            repo.delete_entity("jane-doe").await,
            Err(AppError::Storage { .. })
        ));
        assert!(repo.get_entity("jane-doe").await.is_ok());
        assert!(repo.articles.contains("jane-doe").await);

        std::fs::remove_dir(&blocker).unwrap();
        let report = repo.delete_entity("jane-doe").await.unwrap();
        assert!(report.article);
        assert!(!report.notability);
        assert!(repo.get_entity("jane-doe").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_entity() {
        let repo = Repository::in_memory();
        assert!(matches!(
            repo.delete_entity("nobody").await,
            Err(AppError::EntityNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ensure_notability_record_is_idempotent() {
        let repo = Repository::in_memory();
        assert!(repo.ensure_notability_record("jane-doe").await.unwrap());
        assert!(!repo.ensure_notability_record("jane-doe").await.unwrap());
    }

    #[tokio::test]
    async fn test_entity_lock_serializes() {
        let repo = Repository::in_memory();
        let guard = repo.lock("jane-doe").await;

        let other = repo.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.lock("jane-doe").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // a different entity is not blocked
        let _unrelated = repo.lock("john-roe").await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_dir_and_pings() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let repo = Repository::open(&data).await.unwrap();
        repo.ping().await.unwrap();
        assert!(data.is_dir());
    }
}
