//! Section research drafts and the single-shot article draft

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use super::{entity_variables, Pipeline};
use crate::db::models::{
    score, Article, ArticleBody, ArticleStatus, EntityCategory, EntityState, EntityStatus, Phase,
    ResearchDraft, ResearchSection, WritingDraft,
};
use crate::errors::{AppError, Result};
use crate::jobs::{JobSet, Progress, Stage, SubTaskSpec, TrackedJob};
use crate::llm::{run_blocking, PromptRequest};
use crate::metrics::{record_job, JobMetric};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartResearchRequest {
    /// Overrides the entity's own category
    #[serde(default)]
    pub category: Option<EntityCategory>,
}

/// Aggregate progress of a draft after a reconciliation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftProgress {
    pub id: String,
    pub total_sections: usize,
    pub completed_sections: usize,
    pub pending_sections: usize,
    pub failed_sections: usize,
    pub progress_percentage: f64,
    pub updated_sections: Vec<String>,
    pub retried_sections: Vec<String>,
    pub is_complete: bool,
    /// `completed`, `failed` or `pending`
    pub status: String,
}

impl DraftProgress {
    pub fn new(id: impl Into<String>, progress: &Progress) -> Self {
        Self {
            id: id.into(),
            total_sections: progress.total,
            completed_sections: progress.completed,
            pending_sections: progress.pending,
            failed_sections: progress.failed,
            progress_percentage: progress.percentage,
            updated_sections: progress.updated.clone(),
            retried_sections: progress.retried.clone(),
            is_complete: progress.is_complete,
            status: progress.status_label().to_string(),
        }
    }
}

/// Draft as exposed over the API: the job set flattened into the
/// `statuses` / `results` views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftView {
    pub id: String,
    pub category: EntityCategory,
    pub status: String,
    pub statuses: BTreeMap<String, Option<String>>,
    pub results: BTreeMap<String, Option<Value>>,
    pub retry_counts: BTreeMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftView {
    fn build<R: Clone + Serialize>(
        id: &str,
        category: EntityCategory,
        jobs: &JobSet<R>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            category,
            status: jobs.progress().status_label().to_string(),
            statuses: jobs.statuses(),
            results: jobs.results(),
            retry_counts: jobs
                .jobs
                .iter()
                .map(|(key, job)| (key.clone(), job.retry_count))
                .collect(),
            created_at,
            updated_at,
        }
    }
}

impl From<&ResearchDraft> for DraftView {
    fn from(draft: &ResearchDraft) -> Self {
        Self::build(&draft.id, draft.category, &draft.jobs, draft.created_at, draft.updated_at)
    }
}

impl From<&WritingDraft> for DraftView {
    fn from(draft: &WritingDraft) -> Self {
        Self::build(&draft.id, draft.category, &draft.jobs, draft.created_at, draft.updated_at)
    }
}

impl Pipeline {
    /// Submit one research job per section of the category's plan
    #[instrument(skip(self, request))]
    pub async fn start_research_draft(
        &self,
        id: &str,
        request: StartResearchRequest,
    ) -> Result<ResearchDraft> {
        let _guard = self.repo.lock(id).await;
        let entity = self.repo.get_entity(id).await?;

        // the verdict lives in another collection; re-derive it from sources
        let notable = self
            .repo
            .notability
            .get(id)
            .await
            .is_some_and(|record| record.is_notable.is_some() && score(&record.sources));
        if !notable {
            return Err(AppError::precondition(
                "Entity does not exist or does not meet notability requirements",
            ));
        }

        // only a draft that failed and has nothing left in flight is replaced
        let previous = self.repo.research_drafts.get(id).await;
        if let Some(draft) = &previous {
            if draft.jobs.in_flight() || !draft.jobs.has_failed() {
                return Err(AppError::conflict("Draft already exists for this entity"));
            }
        }
        let generation = previous.as_ref().map_or(0, |draft| draft.jobs.generation() + 1);

        let category = request
            .category
            .or(entity.category)
            .unwrap_or(EntityCategory::VentureCapitalist);
        let plan = self.prompts.research.get(category.as_str()).ok_or_else(|| {
            AppError::NotImplemented {
                message: format!("Entity type '{}' not yet implemented", category),
            }
        })?;

        let specs = plan
            .iter()
            .map(|(section, prompt)| {
                SubTaskSpec::new(section.clone(), prompt.prompt_ref(), entity_variables(&entity, category))
                    .with_generation(generation)
            })
            .collect();
        let now = Utc::now();
        let jobs = self
            .tracker
            .submit_set(Stage::SectionResearch, id, specs, now)
            .await;

        let mut draft = ResearchDraft::new(id, category, jobs);
        if let Some(previous) = previous {
            info!(generation, "Replacing failed research draft");
            draft.created_at = previous.created_at;
        }
        self.repo.research_drafts.upsert(draft.clone()).await?;
        self.set_status(id, EntityStatus::new(EntityState::DraftResearch, Phase::Processing))
            .await?;

        info!(sections = draft.jobs.jobs.len(), category = %category, "Research draft started");
        Ok(draft)
    }

    pub async fn get_research_draft(&self, id: &str) -> Result<ResearchDraft> {
        self.repo
            .research_drafts
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found("research_draft", id))
    }

    pub async fn list_research_drafts(&self) -> Vec<ResearchDraft> {
        self.repo.research_drafts.list().await
    }

    /// Reconcile every outstanding section now
    pub async fn check_research_draft(&self, id: &str) -> Result<DraftProgress> {
        self.reconcile_research_draft(id, Utc::now()).await
    }

    #[instrument(skip(self, now))]
    pub(crate) async fn reconcile_research_draft(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<DraftProgress> {
        let _guard = self.repo.lock(id).await;
        let mut draft = self.get_research_draft(id).await?;
        // migrated jobs carry no variables; resubmission needs them
        let unbound = |job: &TrackedJob<ResearchSection>| job.variables.is_empty() && !job.is_terminal();
        if draft.jobs.jobs.values().any(unbound) {
            if let Ok(entity) = self.repo.get_entity(id).await {
                let variables = entity_variables(&entity, draft.category);
                for job in draft.jobs.jobs.values_mut().filter(|job| unbound(&**job)) {
                    job.variables = variables.clone();
                }
            }
        }

        let progress = self
            .tracker
            .reconcile(Stage::SectionResearch, id, &mut draft.jobs, now)
            .await;

        if progress.changed() {
            draft.updated_at = now;
            self.repo.research_drafts.upsert(draft).await?;

            if progress.is_complete {
                self.set_status(id, EntityStatus::new(EntityState::DraftResearch, Phase::Completed))
                    .await?;
            } else if progress.has_failed {
                self.set_status(id, EntityStatus::failed()).await?;
            }
        }

        Ok(DraftProgress::new(id, &progress))
    }

    /// Generate the article text in one synchronous prompt call from the
    /// completed research; overwrites any existing article
    #[instrument(skip(self))]
    pub async fn draft_document(&self, id: &str) -> Result<Article> {
        let _guard = self.repo.lock(id).await;
        let draft = self.get_research_draft(id).await?;
        if !draft.jobs.is_complete() {
            return Err(AppError::precondition("Research sections are not complete"));
        }
        let entity = self.repo.get_entity(id).await?;

        let plan = self.prompts.research.get(draft.category.as_str()).ok_or_else(|| {
            AppError::NotImplemented {
                message: format!("Entity type '{}' not yet implemented", draft.category),
            }
        })?;

        let mut variables = entity_variables(&entity, draft.category);
        for (section, prompt) in plan {
            let Some(variable) = &prompt.variable else {
                continue;
            };
            let content = draft
                .jobs
                .jobs
                .get(section)
                .and_then(|job| job.result())
                .map(|result| result.content())
                .unwrap_or_default();
            variables.insert(variable.clone(), content);
        }

        self.set_status(id, EntityStatus::new(EntityState::DraftWriting, Phase::Processing))
            .await?;

        let stage = Stage::ArticleDraft.as_str();
        record_job(JobMetric::Submitted, stage);
        let request = PromptRequest::blocking(self.prompts.article_draft.clone(), variables);
        let text = match run_blocking(self.tracker.client().as_ref(), request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Article draft failed");
                record_job(JobMetric::Failed, stage);
                self.set_status(id, EntityStatus::failed()).await?;
                return Err(e);
            }
        };
        record_job(JobMetric::Completed, stage);

        let body = ArticleBody::Text { text };
        let article = match self.repo.articles.get(id).await {
            Some(mut article) => {
                article.replace(ArticleStatus::Drafted, body);
                article
            }
            None => Article::new(id, ArticleStatus::Drafted, body),
        };
        self.repo.articles.upsert(article.clone()).await?;
        self.set_status(id, EntityStatus::new(EntityState::DraftWriting, Phase::Completed))
            .await?;

        info!("Article drafted");
        Ok(article)
    }
}
