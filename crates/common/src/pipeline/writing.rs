//! Per-section article writing from completed research

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use super::research::DraftProgress;
use super::{entity_variables, Pipeline};
use crate::db::models::{
    Article, ArticleBody, ArticleStatus, EntityState, EntityStatus, Phase, ResearchDraft,
    WritingDraft,
};
use crate::errors::{AppError, Result};
use crate::jobs::{Stage, SubTaskSpec};

/// Research content handed to a writing prompt, one block per section
fn research_digest(draft: &ResearchDraft, sections: &[String]) -> String {
    sections
        .iter()
        .filter_map(|section| {
            let content = draft.jobs.jobs.get(section)?.result()?.content();
            (!content.is_empty()).then(|| format!("## {}\n{}", section, content))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Pipeline {
    /// Submit one writing job per configured article section
    #[instrument(skip(self))]
    pub async fn start_writing(&self, id: &str) -> Result<WritingDraft> {
        let _guard = self.repo.lock(id).await;
        let entity = self.repo.get_entity(id).await?;
        let research = self
            .repo
            .research_drafts
            .get(id)
            .await
            .filter(|draft| draft.jobs.is_complete())
            .ok_or_else(|| AppError::precondition("Research draft is missing or incomplete"))?;

        let previous = self.repo.writing_drafts.get(id).await;
        if previous.as_ref().is_some_and(|draft| draft.jobs.in_flight()) {
            return Err(AppError::conflict(format!("Writing for {} is already in progress", id)));
        }
        let generation = previous.map_or(0, |draft| draft.jobs.generation() + 1);

        let category = research.category;
        let plan = self.prompts.writing.get(category.as_str()).ok_or_else(|| {
            AppError::NotImplemented {
                message: format!("No writing plan for entity type '{}'", category),
            }
        })?;

        let specs = plan
            .iter()
            .map(|(section, prompt)| {
                let mut variables = entity_variables(&entity, category);
                variables.insert("research".to_string(), research_digest(&research, &prompt.research));
                SubTaskSpec::new(section.clone(), prompt.prompt_ref(), variables)
                    .with_generation(generation)
            })
            .collect();
        let now = Utc::now();
        let jobs = self
            .tracker
            .submit_set(Stage::ArticleWriting, id, specs, now)
            .await;

        let draft = WritingDraft::new(id, category, jobs);
        self.repo.writing_drafts.upsert(draft.clone()).await?;

        let article = match self.repo.articles.get(id).await {
            Some(mut article) => {
                article.replace(ArticleStatus::Drafting, ArticleBody::Empty);
                article
            }
            None => Article::new(id, ArticleStatus::Drafting, ArticleBody::Empty),
        };
        self.repo.articles.upsert(article).await?;
        self.set_status(id, EntityStatus::new(EntityState::DraftWriting, Phase::Processing))
            .await?;

        info!(sections = draft.jobs.jobs.len(), "Writing started");
        Ok(draft)
    }

    pub async fn get_writing_draft(&self, id: &str) -> Result<WritingDraft> {
        self.repo
            .writing_drafts
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found("writing_draft", id))
    }

    pub async fn check_writing(&self, id: &str) -> Result<DraftProgress> {
        self.reconcile_writing(id, Utc::now()).await
    }

    #[instrument(skip(self, now))]
    pub(crate) async fn reconcile_writing(&self, id: &str, now: DateTime<Utc>) -> Result<DraftProgress> {
        let _guard = self.repo.lock(id).await;
        let mut draft = self.get_writing_draft(id).await?;

        let progress = self
            .tracker
            .reconcile(Stage::ArticleWriting, id, &mut draft.jobs, now)
            .await;
        if !progress.changed() {
            return Ok(DraftProgress::new(id, &progress));
        }

        draft.updated_at = now;
        let sections = draft.jobs.completed_results();
        self.repo.writing_drafts.upsert(draft).await?;

        if progress.is_complete {
            let body = ArticleBody::Sections { sections };
            let article = match self.repo.articles.get(id).await {
                Some(mut article) => {
                    article.replace(ArticleStatus::Drafted, body);
                    article
                }
                None => Article::new(id, ArticleStatus::Drafted, body),
            };
            self.repo.articles.upsert(article).await?;
            self.set_status(id, EntityStatus::new(EntityState::DraftWriting, Phase::Completed))
                .await?;
            info!("Article sections written");
        } else if progress.has_failed {
            self.set_status(id, EntityStatus::failed()).await?;
        }

        Ok(DraftProgress::new(id, &progress))
    }
}
