//! Notability records: research job, sources and the verdict

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::Pipeline;
use crate::db::models::{
    Entity, EntityState, EntityStatus, NotabilityRecord, Phase, Source, SourceList,
};
use crate::errors::{AppError, Result};
use crate::jobs::{JobEvent, Stage, SubTaskSpec, TrackedJob};

const RESEARCH_KEY: &str = "research";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertNotabilityRequest {
    pub entity_id: String,

    /// Replaces stored sources and recomputes the verdict when present
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceSourcesRequest {
    pub sources: Vec<Source>,
}

/// State of an entity's research job as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStatus {
    pub id: String,

    /// `pending`, `completed` or `failed`
    pub status: String,

    pub job_id: Option<String>,

    pub retry_count: u32,

    /// Present once the research job completed
    pub sources: Option<Vec<Source>>,

    pub is_notable: Option<bool>,
}

impl ResearchStatus {
    fn from_record(record: &NotabilityRecord, job: &TrackedJob<SourceList>) -> Self {
        Self {
            id: record.id.clone(),
            status: job.status_label().to_string(),
            job_id: job.job_id().map(str::to_string),
            retry_count: job.retry_count,
            sources: job.is_completed().then(|| record.sources.clone()),
            is_notable: record.is_notable,
        }
    }
}

fn research_variables(entity: &Entity) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();
    variables.insert("canonical_name".to_string(), entity.name.clone());
    variables.insert("context".to_string(), entity.context.clone());
    variables
}

impl Pipeline {
    /// Create or update a notability record for an existing entity
    #[instrument(skip(self, request), fields(entity_id = %request.entity_id))]
    pub async fn upsert_notability(&self, request: UpsertNotabilityRequest) -> Result<NotabilityRecord> {
        let id = request.entity_id;
        let _guard = self.repo.lock(&id).await;
        self.repo.get_entity(&id).await?;

        let mut record = self
            .repo
            .notability
            .get(&id)
            .await
            .unwrap_or_else(|| NotabilityRecord::new(id.clone()));
        if let Some(sources) = request.sources {
            record.set_sources(sources);
        }
        self.repo.notability.upsert(record.clone()).await?;
        Ok(record)
    }

    pub async fn get_notability(&self, id: &str) -> Result<NotabilityRecord> {
        self.repo
            .notability
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found("notability", id))
    }

    pub async fn list_notability(&self) -> Vec<NotabilityRecord> {
        self.repo.notability.list().await
    }

    /// Replace the source list; the verdict follows
    #[instrument(skip(self, sources), fields(count = sources.len()))]
    pub async fn replace_sources(&self, id: &str, sources: Vec<Source>) -> Result<NotabilityRecord> {
        let _guard = self.repo.lock(id).await;
        self.repo
            .notability
            .update(id, |record| {
                record.set_sources(sources);
                record.clone()
            })
            .await?
            .ok_or_else(|| AppError::not_found("notability", id))
    }

    /// Recompute the verdict from stored sources
    #[instrument(skip(self))]
    pub async fn recalculate_notability(&self, id: &str) -> Result<NotabilityRecord> {
        let _guard = self.repo.lock(id).await;
        let record = self
            .repo
            .notability
            .update(id, |record| {
                record.recalculate();
                record.clone()
            })
            .await?
            .ok_or_else(|| AppError::not_found("notability", id))?;
        info!(is_notable = ?record.is_notable, "Notability recalculated");
        Ok(record)
    }

    /// Submit the background research job for an entity
    #[instrument(skip(self))]
    pub async fn start_research(&self, id: &str) -> Result<ResearchStatus> {
        let _guard = self.repo.lock(id).await;
        let entity = self.repo.get_entity(id).await?;
        if entity.name.trim().is_empty() || entity.context.trim().is_empty() {
            return Err(AppError::precondition("Entity missing required name or context"));
        }

        let mut record = self
            .repo
            .notability
            .get(id)
            .await
            .unwrap_or_else(|| NotabilityRecord::new(id));
        if record.research.as_ref().is_some_and(|job| !job.is_terminal()) {
            return Err(AppError::conflict(format!(
                "Research for {} is already in progress",
                id
            )));
        }

        let variables = research_variables(&entity);
        let generation = record.research.as_ref().map_or(0, |job| job.generation + 1);
        let spec = SubTaskSpec::new(RESEARCH_KEY, self.prompts.notability_research.clone(), variables)
            .with_generation(generation);

        let now = Utc::now();
        let job = self
            .tracker
            .submit(Stage::NotabilityResearch, id, spec, now)
            .await;
        let status = ResearchStatus::from_record(&record, &job);
        record.research = Some(job);
        record.updated_at = now;
        self.repo.notability.upsert(record).await?;

        self.set_status(id, EntityStatus::new(EntityState::Notability, Phase::Processing))
            .await?;
        Ok(status)
    }

    /// Reconcile the research job now
    pub async fn check_research(&self, id: &str) -> Result<ResearchStatus> {
        self.reconcile_research(id, Utc::now()).await
    }

    #[instrument(skip(self, now))]
    pub(crate) async fn reconcile_research(&self, id: &str, now: DateTime<Utc>) -> Result<ResearchStatus> {
        let _guard = self.repo.lock(id).await;
        let mut record = self
            .repo
            .notability
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found("notability", id))?;
        let Some(mut job) = record.research.take() else {
            return Err(AppError::precondition("No research request found for this entity"));
        };
        // migrated jobs carry no variables; resubmission needs them
        if job.variables.is_empty() && !job.is_terminal() {
            if let Ok(entity) = self.repo.get_entity(id).await {
                job.variables = research_variables(&entity);
            }
        }

        let event = self
            .tracker
            .check(Stage::NotabilityResearch, id, RESEARCH_KEY, &mut job, now)
            .await;

        match &event {
            JobEvent::Completed => {
                let sources = job.result().map(|r| r.sources.clone()).unwrap_or_default();
                let verdict = record.set_sources(sources);
                info!(sources = record.sources.len(), is_notable = verdict, "Research completed");
                self.set_status(id, EntityStatus::new(EntityState::Notability, Phase::Completed))
                    .await?;
            }
            JobEvent::Failed { .. } => {
                self.set_status(id, EntityStatus::failed()).await?;
            }
            JobEvent::Retried { .. } | JobEvent::Unsubmitted | JobEvent::Unchanged => {}
        }

        let status = ResearchStatus::from_record(&record, &job);
        record.research = Some(job);
        if event != JobEvent::Unchanged {
            record.updated_at = now;
            self.repo.notability.upsert(record).await?;
        }
        Ok(status)
    }
}
