//! Pipeline stage handlers
//!
//! Each stage is an instantiation of "submit N named jobs for an entity,
//! reconcile them later, advance the entity status". Every handler runs its
//! load, mutate and save sequence under the entity's repository lock.

mod articles;
mod entities;
mod extraction;
mod notability;
mod research;
mod writing;

pub use articles::UpdateArticleStatusRequest;
pub use entities::{CreateEntityRequest, UpdateStatusRequest};
pub use extraction::{ExtractedEntity, ExtractionPayload, ExtractionRequest, ExtractionResult, EXCLUDED_TYPES};
pub use notability::{ReplaceSourcesRequest, ResearchStatus, UpsertNotabilityRequest};
pub use research::{DraftProgress, DraftView, StartResearchRequest};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PromptsConfig;
use crate::db::models::{Entity, EntityCategory, EntityStatus};
use crate::db::Repository;
use crate::errors::Result;
use crate::jobs::{JobTracker, SweepReport, SweepTarget};

/// Stage handlers over a repository and a job tracker
#[derive(Clone)]
pub struct Pipeline {
    repo: Repository,
    tracker: JobTracker,
    prompts: Arc<PromptsConfig>,
}

impl Pipeline {
    pub fn new(repo: Repository, tracker: JobTracker, prompts: PromptsConfig) -> Self {
        Self {
            repo,
            tracker,
            prompts: Arc::new(prompts),
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Move an entity to a new status if it still exists
    async fn set_status(&self, entity_id: &str, status: EntityStatus) -> Result<()> {
        let changed = self
            .repo
            .entities
            .update(entity_id, |entity| entity.transition(status))
            .await?;
        match changed {
            Some(true) => info!(
                entity_id,
                state = ?status.state,
                phase = ?status.phase,
                "Entity status changed"
            ),
            Some(false) => {}
            None => warn!(entity_id, "Status change for missing entity"),
        }
        Ok(())
    }
}

/// Category label plus name and context, as bound by every drafting prompt
fn entity_variables(entity: &Entity, category: EntityCategory) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();
    variables.insert("entity".to_string(), entity.name.clone());
    variables.insert("context".to_string(), entity.context.clone());
    variables.insert("type".to_string(), category.label().to_string());
    variables
}

#[async_trait]
impl SweepTarget for Pipeline {
    async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let pending_research = self
            .repo
            .notability
            .filter(|record| record.research.as_ref().is_some_and(|job| !job.is_terminal()))
            .await;
        for record in pending_research {
            report.visited += 1;
            if let Err(e) = self.reconcile_research(&record.id, now).await {
                warn!(entity_id = %record.id, error = %e, "Sweep of notability research failed");
                report.errors += 1;
            }
        }

        let research_drafts = self
            .repo
            .research_drafts
            .filter(|draft| draft.jobs.in_flight())
            .await;
        for draft in research_drafts {
            report.visited += 1;
            if let Err(e) = self.reconcile_research_draft(&draft.id, now).await {
                warn!(entity_id = %draft.id, error = %e, "Sweep of research draft failed");
                report.errors += 1;
            }
        }

        let writing_drafts = self
            .repo
            .writing_drafts
            .filter(|draft| draft.jobs.in_flight())
            .await;
        for draft in writing_drafts {
            report.visited += 1;
            if let Err(e) = self.reconcile_writing(&draft.id, now).await {
                warn!(entity_id = %draft.id, error = %e, "Sweep of writing draft failed");
                report.errors += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{ResearchPrompt, WritingPrompt};
    use crate::db::models::{EntityState, Phase};
    use crate::jobs::RetryPolicy;
    use crate::llm::MockJobClient;

    pub(crate) struct Harness {
        pub mock: Arc<MockJobClient>,
        pub pipeline: Pipeline,
    }

    /// Two-section research plan and one writing section for venture capitalists
    pub(crate) fn prompts() -> PromptsConfig {
        let mut prompts = PromptsConfig::default();
        let mut research = BTreeMap::new();
        research.insert(
            "early_life".to_string(),
            ResearchPrompt {
                id: "pmpt_early_life".into(),
                version: "7".into(),
                variable: Some("elac".into()),
            },
        );
        research.insert(
            "vc_career".to_string(),
            ResearchPrompt {
                id: "pmpt_vc_career".into(),
                version: "3".into(),
                variable: Some("vcc".into()),
            },
        );
        prompts.research.insert("venture_capitalist".into(), research);

        let mut writing = BTreeMap::new();
        writing.insert(
            "career".to_string(),
            WritingPrompt {
                id: "pmpt_write_career".into(),
                version: "1".into(),
                research: vec!["vc_career".into()],
            },
        );
        prompts.writing.insert("venture_capitalist".into(), writing);
        prompts
    }

    pub(crate) fn harness() -> Harness {
        let mock = Arc::new(MockJobClient::new());
        let tracker = JobTracker::new(mock.clone(), RetryPolicy::default());
        let pipeline = Pipeline::new(Repository::in_memory(), tracker, prompts());
        Harness { mock, pipeline }
    }

    pub(crate) async fn create_vc(pipeline: &Pipeline, name: &str, state: EntityState) -> Entity {
        pipeline
            .create_entity(CreateEntityRequest {
                name: name.to_string(),
                context: "Partner at Example Ventures".to_string(),
                category: Some(EntityCategory::VentureCapitalist),
                status: Some(EntityStatus::new(state, Phase::Queued)),
            })
            .await
            .unwrap()
    }

    pub(crate) fn notable_sources() -> String {
        r#"{"sources": [
            {"url": "https://a", "title": "A", "meets_standards": true, "rationale": "profile"},
            {"url": "https://b", "title": "B", "meets_standards": true, "rationale": "feature"},
            {"url": "https://c", "title": "C", "meets_standards": false, "rationale": "press release"}
        ]}"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::models::EntityState;
    use crate::jobs::{RetryPolicy, SweepTarget};
    use crate::llm::MockJobClient;

    #[tokio::test]
    async fn test_sweep_advances_pending_research() {
        let Harness { mock, pipeline } = harness();
        create_vc(&pipeline, "Jane Doe", EntityState::Notability).await;
        let status = pipeline.start_research("jane-doe").await.unwrap();
        let job_id = status.job_id.unwrap();
        mock.complete(&job_id, notable_sources());

        let report = pipeline.sweep().await.unwrap();
        assert_eq!(report.visited, 1);
        assert_eq!(report.errors, 0);

        let record = pipeline.get_notability("jane-doe").await.unwrap();
        assert_eq!(record.is_notable, Some(true));

        // nothing left in flight
        assert_eq!(pipeline.sweep().await.unwrap().visited, 0);
    }

    #[tokio::test]
    async fn test_legacy_data_dir_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, line: &str| {
            std::fs::write(dir.path().join(name), format!("# legacy store\n{}\n", line)).unwrap();
        };
        write(
            "entities.jsonl",
            r#"{"id": "jane-doe", "name": "Jane Doe", "context": "Partner at Example Ventures", "status": "drafting_sections"}"#,
        );
        write(
            "notability.jsonl",
            r#"{"id": "jane-doe", "is_notable": true, "openai_research_request_id": "resp_n", "sources": [{"url": "https://a", "title": "A", "meets_standards": true}, {"url": "https://b", "title": "B", "meets_standards": true}], "openai_notability_request_id": null}"#,
        );
        write(
            "research_drafts.jsonl",
            r#"{"id": "jane-doe", "type": "venture_capitalist", "statuses": {"early_life_id": "resp_a", "vc_career_id": "resp_b"}, "results": {"early_life": {"pages": []}, "vc_career": null}, "created_at": "2025-07-24T18:02:11.123456", "updated_at": "2025-07-24T18:02:11.123456"}"#,
        );
        write(
            "articles.jsonl",
            r#"{"id": "jane-doe", "status": "drafted", "text": "Jane Doe is an investor.", "created_at": "2025-07-24T18:02:11", "updated_at": "2025-07-24T18:02:11"}"#,
        );

        let repo = Repository::open(dir.path()).await.unwrap();
        let mock = Arc::new(MockJobClient::new());
        let tracker = JobTracker::new(mock.clone(), RetryPolicy::default());
        let pipeline = Pipeline::new(repo, tracker, prompts());

        let record = pipeline.get_notability("jane-doe").await.unwrap();
        assert_eq!(record.is_notable, Some(true));
        assert!(record.research.unwrap().is_completed());
        let article = pipeline.get_article("jane-doe").await.unwrap();
        assert!(matches!(article.body, crate::db::models::ArticleBody::Text { .. }));
        let draft = pipeline.get_research_draft("jane-doe").await.unwrap();
        assert_eq!(draft.jobs.pending_job_ids(), vec!["resp_b".to_string()]);

        // files were rewritten in the current layout
        let rewritten = std::fs::read_to_string(dir.path().join("research_drafts.jsonl")).unwrap();
        assert!(rewritten.contains("\"category\":\"venture_capitalist\""));
        assert!(!rewritten.contains("\"statuses\""));

        // a stale legacy job is resubmitted with the entity's variables
        let later = chrono::Utc::now() + chrono::Duration::seconds(601);
        let progress = pipeline.reconcile_research_draft("jane-doe", later).await.unwrap();
        assert_eq!(progress.retried_sections, vec!["vc_career"]);
        let (_, request) = mock.submissions().pop().unwrap();
        assert_eq!(request.variables["entity"], "Jane Doe");
        assert_eq!(request.variables["type"], "Venture Capitalist");
        assert_eq!(mock.cancelled(), vec!["resp_b".to_string()]);
    }
}
