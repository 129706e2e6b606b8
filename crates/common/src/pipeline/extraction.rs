//! Named-entity extraction from free text

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, instrument};
use validator::Validate;

use super::Pipeline;
use crate::db::models::{entity_id_from_name, Entity, EntityState, EntityStatus, Phase};
use crate::errors::Result;
use crate::jobs::{Payload, Stage};
use crate::llm::{run_blocking, PromptRequest};
use crate::metrics::{record_job, JobMetric};

/// Entity types with no article potential
pub const EXCLUDED_TYPES: &[&str] = &[
    "LANGUAGE", "DATE", "TIME", "PERCENT", "MONEY", "QUANTITY", "ORDINAL", "CARDINAL",
];

/// Characters of the source text kept as context for persisted entities
const CONTEXT_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExtractionRequest {
    #[validate(length(min = 1, max = 100000))]
    pub text: String,

    /// Context stored on created entities; defaults to the head of `text`
    #[serde(default)]
    pub context: Option<String>,

    /// Create the surviving entities as backlogged
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
}

impl Payload for ExtractionPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,

    /// Ids of entities created when `persist` was requested
    pub created: Vec<String>,
}

impl Pipeline {
    /// Extract candidate entities not yet tracked
    #[instrument(skip(self, request), fields(text_len = request.text.len(), persist = request.persist))]
    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult> {
        request.validate()?;

        let mut variables = BTreeMap::new();
        variables.insert("text".to_string(), request.text.clone());
        let stage = Stage::Extraction.as_str();
        record_job(JobMetric::Submitted, stage);
        let raw = run_blocking(
            self.tracker.client().as_ref(),
            PromptRequest::blocking(self.prompts.extraction.clone(), variables),
        )
        .await
        .inspect_err(|_| record_job(JobMetric::Failed, stage))?;
        record_job(JobMetric::Completed, stage);
        let payload = ExtractionPayload::parse(&raw);

        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for candidate in payload.entities {
            if EXCLUDED_TYPES.contains(&candidate.entity_type.as_str()) {
                continue;
            }
            let id = entity_id_from_name(&candidate.value);
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            if self.repo.entities.contains(&id).await {
                continue;
            }
            entities.push(candidate);
        }

        let mut created = Vec::new();
        if request.persist {
            let context = request
                .context
                .clone()
                .unwrap_or_else(|| request.text.chars().take(CONTEXT_CHARS).collect());
            for candidate in &entities {
                let entity = Entity::new(
                    candidate.value.clone(),
                    context.clone(),
                    None,
                    EntityStatus::new(EntityState::Backlogged, Phase::Queued),
                );
                let _guard = self.repo.lock(&entity.id).await;
                // a concurrent request may have created it meanwhile
                if self.repo.entities.contains(&entity.id).await {
                    continue;
                }
                created.push(self.repo.entities.insert(entity).await?.id);
            }
        }

        info!(found = entities.len(), created = created.len(), "Extraction finished");
        Ok(ExtractionResult { entities, created })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    const PAYLOAD: &str = r#"{"entities": [
        {"type": "PERSON", "value": "Jane Doe"},
        {"type": "ORG", "value": "Example Ventures"},
        {"type": "DATE", "value": "2019"},
        {"type": "PERSON", "value": "jane  doe"},
        {"type": "GPE", "value": "Palm City, FL"}
    ]}"#;

    #[tokio::test]
    async fn test_filters_types_duplicates_and_known_entities() {
        let Harness { mock, pipeline } = harness();
        mock.set_default_payload(PAYLOAD);
        create_vc(&pipeline, "Palm City, FL", EntityState::Backlogged).await;

        let result = pipeline
            .extract(ExtractionRequest {
                text: "Jane Doe of Example Ventures moved to Palm City, FL in 2019.".into(),
                context: None,
                persist: false,
            })
            .await
            .unwrap();

        let values: Vec<&str> = result.entities.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["Jane Doe", "Example Ventures"]);
        assert!(result.created.is_empty());
        assert!(!pipeline.repo().entities.contains("jane-doe").await);
    }

    #[tokio::test]
    async fn test_persist_creates_backlogged_entities() {
        let Harness { mock, pipeline } = harness();
        mock.set_default_payload(PAYLOAD);
        let text = "x".repeat(800);

        let result = pipeline
            .extract(ExtractionRequest {
                text: text.clone(),
                context: None,
                persist: true,
            })
            .await
            .unwrap();

        assert_eq!(result.created, vec!["jane-doe", "example-ventures", "palm-city-fl"]);
        let entity = pipeline.get_entity("example-ventures").await.unwrap();
        assert_eq!(entity.status, EntityStatus::new(EntityState::Backlogged, Phase::Queued));
        assert_eq!(entity.context.len(), 500);
    }

    #[tokio::test]
    async fn test_unparseable_payload_yields_nothing() {
        let Harness { mock, pipeline } = harness();
        mock.set_default_payload("Sorry, I cannot help with that.");
        let result = pipeline
            .extract(ExtractionRequest {
                text: "Some text".into(),
                context: None,
                persist: true,
            })
            .await
            .unwrap();
        assert!(result.entities.is_empty());
        assert!(result.created.is_empty());
    }
}
