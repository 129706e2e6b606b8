//! Entity lifecycle: create, read, manual status changes, cascading delete

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::Pipeline;
use crate::db::models::{Entity, EntityCategory, EntityState, EntityStatus};
use crate::db::CascadeReport;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateEntityRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(length(max = 5000))]
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub category: Option<EntityCategory>,

    /// Initial `(state, phase)`; both halves unset when omitted
    #[serde(default)]
    pub status: Option<EntityStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: EntityStatus,
}

impl Pipeline {
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_entity(&self, request: CreateEntityRequest) -> Result<Entity> {
        request.validate()?;

        let entity = Entity::new(
            request.name,
            request.context,
            request.category,
            request.status.unwrap_or_default(),
        );
        if entity.id.is_empty() {
            return Err(AppError::Validation {
                message: "name does not yield an identifier".to_string(),
                field: Some("name".to_string()),
            });
        }

        let _guard = self.repo.lock(&entity.id).await;
        let entity = self.repo.entities.insert(entity).await?;
        if entity.status.state.is_some_and(|s| s.needs_notability_record()) {
            self.repo.ensure_notability_record(&entity.id).await?;
        }

        info!(entity_id = %entity.id, "Entity created");
        Ok(entity)
    }

    pub async fn get_entity(&self, id: &str) -> Result<Entity> {
        self.repo.get_entity(id).await
    }

    /// All entities, optionally restricted to one state
    pub async fn list_entities(&self, state: Option<EntityState>) -> Vec<Entity> {
        match state {
            Some(state) => {
                self.repo
                    .entities
                    .filter(|e| e.status.state == Some(state))
                    .await
            }
            None => self.repo.entities.list().await,
        }
    }

    /// Manual status change; the only way to move an entity backward
    #[instrument(skip(self, status))]
    pub async fn update_entity_status(&self, id: &str, status: EntityStatus) -> Result<Entity> {
        let _guard = self.repo.lock(id).await;

        let updated = self
            .repo
            .entities
            .update(id, |entity| {
                entity.transition(status);
                entity.clone()
            })
            .await?
            .ok_or_else(|| AppError::EntityNotFound { id: id.to_string() })?;

        if status.state.is_some_and(|s| s.needs_notability_record()) {
            self.repo.ensure_notability_record(id).await?;
        }
        Ok(updated)
    }

    /// Delete an entity with every derived record; in-flight jobs are
    /// cancelled best-effort
    #[instrument(skip(self))]
    pub async fn delete_entity(&self, id: &str) -> Result<CascadeReport> {
        let _guard = self.repo.lock(id).await;

        let mut in_flight = Vec::new();
        if let Some(record) = self.repo.notability.get(id).await {
            if let Some(job) = &record.research {
                in_flight.extend(job.job_id().filter(|_| !job.is_terminal()).map(str::to_string));
            }
        }
        if let Some(draft) = self.repo.research_drafts.get(id).await {
            in_flight.extend(draft.jobs.pending_job_ids());
        }
        if let Some(draft) = self.repo.writing_drafts.get(id).await {
            in_flight.extend(draft.jobs.pending_job_ids());
        }

        let report = self.repo.delete_entity(id).await?;
        for job_id in &in_flight {
            self.tracker.cancel_quietly(job_id).await;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::db::models::{Phase, ResearchDraft};
    use crate::jobs::JobSet;

    #[tokio::test]
    async fn test_create_derives_id() {
        let Harness { pipeline, .. } = harness();
        let entity = pipeline
            .create_entity(CreateEntityRequest {
                name: "Palm City, FL".into(),
                context: "A town in Florida".into(),
                category: None,
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(entity.id, "palm-city-fl");
        assert_eq!(entity.status, EntityStatus::default());
        assert_eq!(pipeline.get_entity("palm-city-fl").await.unwrap().name, "Palm City, FL");
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let Harness { pipeline, .. } = harness();
        create_vc(&pipeline, "Jane Doe", EntityState::Backlogged).await;
        let err = pipeline
            .create_entity(CreateEntityRequest {
                name: "jane   doe".into(),
                context: String::new(),
                category: None,
                status: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let Harness { pipeline, .. } = harness();
        let err = pipeline
            .create_entity(CreateEntityRequest {
                name: " , ".into(),
                context: String::new(),
                category: None,
                status: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_entering_notability_creates_record() {
        let Harness { pipeline, .. } = harness();
        create_vc(&pipeline, "Jane Doe", EntityState::Backlogged).await;
        assert!(!pipeline.repo().notability.contains("jane-doe").await);

        let entity = pipeline
            .update_entity_status(
                "jane-doe",
                EntityStatus::new(EntityState::Notability, Phase::Queued),
            )
            .await
            .unwrap();
        assert_eq!(entity.status.state, Some(EntityState::Notability));
        assert!(pipeline.repo().notability.contains("jane-doe").await);

        // idempotent on a second entry
        pipeline
            .update_entity_status(
                "jane-doe",
                EntityStatus::new(EntityState::Notability, Phase::Processing),
            )
            .await
            .unwrap();
        assert_eq!(pipeline.list_entities(Some(EntityState::Notability)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_entity() {
        let Harness { pipeline, .. } = harness();
        let err = pipeline
            .update_entity_status("nobody", EntityStatus::failed())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_cancels_in_flight_jobs() {
        let Harness { mock, pipeline } = harness();
        create_vc(&pipeline, "Jane Doe", EntityState::Notability).await;
        let status = pipeline.start_research("jane-doe").await.unwrap();
        pipeline
            .repo()
            .research_drafts
            .insert(ResearchDraft::new(
                "jane-doe",
                EntityCategory::VentureCapitalist,
                JobSet::default(),
            ))
            .await
            .unwrap();

        let report = pipeline.delete_entity("jane-doe").await.unwrap();
        assert!(report.notability);
        assert!(report.research_draft);
        assert_eq!(mock.cancelled(), vec![status.job_id.unwrap()]);
        assert!(pipeline.get_entity("jane-doe").await.is_err());
    }
}
