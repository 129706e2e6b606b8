//! Notability record, research sources and the notability rule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::default_notability_prompt;
use crate::db::{normalize_timestamps, Record};
use crate::jobs::{JobOutcome, Payload, TrackedJob};

/// Sources meeting editorial standards required for a notable verdict
pub const NOTABILITY_THRESHOLD: usize = 2;

/// A single research citation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,

    #[serde(default)]
    pub title: String,

    #[serde(flatten)]
    pub assessment: SourceAssessment,
}

/// Quality assessment of a source, one variant per payload schema version.
///
/// Current payloads carry a single editorial-standards flag; earlier ones
/// graded the source along four axes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceAssessment {
    Standard {
        meets_standards: bool,
        #[serde(default)]
        rationale: String,
    },
    Graded {
        proximity: Proximity,
        independence: Independence,
        reliability: Reliability,
        depth: Depth,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    Primary,
    Secondary,
    Tertiary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Independence {
    Independent,
    Affiliated,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    High,
    Medium,
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Significant,
    Moderate,
    Trivial,
}

impl Source {
    pub fn meets_standards(&self) -> bool {
        match &self.assessment {
            SourceAssessment::Standard { meets_standards, .. } => *meets_standards,
            SourceAssessment::Graded {
                proximity,
                independence,
                reliability,
                depth,
            } => {
                let proximity_ok = match proximity {
                    Proximity::Primary => false,
                    Proximity::Secondary | Proximity::Tertiary => true,
                };
                let independence_ok = match independence {
                    Independence::Independent => true,
                    Independence::Affiliated | Independence::Unknown => false,
                };
                let reliability_ok = match reliability {
                    Reliability::High | Reliability::Medium => true,
                    Reliability::Low => false,
                };
                let depth_ok = match depth {
                    Depth::Significant => true,
                    Depth::Moderate | Depth::Trivial => false,
                };
                proximity_ok && independence_ok && reliability_ok && depth_ok
            }
        }
    }
}

/// Notability verdict for a source list
pub fn score(sources: &[Source]) -> bool {
    sources.iter().filter(|s| s.meets_standards()).count() >= NOTABILITY_THRESHOLD
}

/// Research payload: `{"sources": [...]}`. Malformed entries are dropped
/// one by one instead of failing the whole list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceList {
    #[serde(default, deserialize_with = "lenient_sources")]
    pub sources: Vec<Source>,
}

impl Payload for SourceList {}

fn lenient_sources<'de, D>(deserializer: D) -> Result<Vec<Source>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Source>(value) {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping invalid source");
                None
            }
        })
        .collect())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotabilityRecord {
    pub id: String,

    #[serde(default)]
    pub sources: Vec<Source>,

    /// External research job; carries job id, submission time and retries
    #[serde(default)]
    pub research: Option<TrackedJob<SourceList>>,

    /// `None` until sources have been researched or set
    #[serde(default)]
    pub is_notable: Option<bool>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl NotabilityRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            sources: Vec::new(),
            research: None,
            is_notable: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the source list and recompute the verdict
    pub fn set_sources(&mut self, sources: Vec<Source>) -> bool {
        self.sources = sources;
        self.recalculate()
    }

    /// Recompute the verdict from the stored sources
    pub fn recalculate(&mut self) -> bool {
        let verdict = score(&self.sources);
        self.is_notable = Some(verdict);
        self.updated_at = Utc::now();
        verdict
    }
}

impl Record for NotabilityRecord {
    const COLLECTION: &'static str = "notability";

    fn id(&self) -> &str {
        &self.id
    }

    /// Early records tracked the research job by its raw request id and let
    /// callers write `is_notable` directly.
    fn migrate(value: &mut Value) -> bool {
        let Some(obj) = value.as_object_mut() else {
            return false;
        };
        let mut changed = false;

        if !obj.contains_key("research") {
            let request_id = obj
                .remove("openai_research_request_id")
                .and_then(|id| id.as_str().map(str::to_string));
            obj.remove("openai_notability_request_id");

            let raw_sources = obj.remove("sources").unwrap_or(Value::Array(Vec::new()));
            let sources = serde_json::from_value::<SourceList>(serde_json::json!({ "sources": raw_sources }))
                .map(|list| list.sources)
                .unwrap_or_default();

            // the verdict only ever follows from sources
            let verdict = (!sources.is_empty()).then(|| score(&sources));
            obj.insert("is_notable".to_string(), verdict.map_or(Value::Null, Value::Bool));

            let research = request_id.map(|job_id| legacy_research(job_id, &sources));
            if let (Ok(sources), Ok(research)) =
                (serde_json::to_value(&sources), serde_json::to_value(research))
            {
                obj.insert("sources".to_string(), sources);
                obj.insert("research".to_string(), research);
            }
            changed = true;
        }

        changed |= normalize_timestamps(obj);
        changed
    }
}

/// A legacy research request with stored sources had completed; one without
/// is picked up again as pending.
fn legacy_research(job_id: String, sources: &[Source]) -> TrackedJob<SourceList> {
    let (outcome, submitted_at) = if sources.is_empty() {
        (JobOutcome::Pending { job_id }, Some(Utc::now()))
    } else {
        (
            JobOutcome::Completed {
                job_id,
                result: SourceList {
                    sources: sources.to_vec(),
                },
            },
            None,
        )
    };
    TrackedJob {
        prompt: default_notability_prompt(),
        variables: Default::default(),
        outcome,
        submitted_at,
        retry_count: 0,
        generation: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn standard(url: &str, meets: bool) -> Source {
        Source {
            url: url.to_string(),
            title: url.to_string(),
            assessment: SourceAssessment::Standard {
                meets_standards: meets,
                rationale: String::new(),
            },
        }
    }

    #[test]
    fn test_threshold_rule() {
        assert!(!score(&[]));
        assert!(!score(&[standard("a", true)]));
        assert!(score(&[standard("a", true), standard("b", true)]));
        assert!(!score(&[standard("a", true), standard("b", false), standard("c", false)]));
    }

    #[test]
    fn test_recalculate_idempotent() {
        let mut record = NotabilityRecord::new("jane-doe");
        record.sources = vec![standard("a", true), standard("b", true)];
        let first = record.recalculate();
        let second = record.recalculate();
        assert_eq!(first, second);
        assert_eq!(record.is_notable, Some(true));
    }

    #[test]
    fn test_remove_true_source_flips_verdict() {
        let mut record = NotabilityRecord::new("jane-doe");
        assert!(record.set_sources(vec![
            standard("a", true),
            standard("b", true),
            standard("c", false),
        ]));
        let remaining: Vec<Source> = record.sources.iter().skip(1).cloned().collect();
        assert!(!record.set_sources(remaining));
        assert_eq!(record.is_notable, Some(false));
    }

    #[test]
    fn test_graded_sources() {
        let payload = json!({
            "url": "https://example.com",
            "title": "Profile",
            "proximity": "secondary",
            "independence": "independent",
            "reliability": "high",
            "depth": "significant"
        });
        let source: Source = serde_json::from_value(payload).unwrap();
        assert!(matches!(source.assessment, SourceAssessment::Graded { .. }));
        assert!(source.meets_standards());

        let trivial = json!({
            "url": "https://example.com/2",
            "proximity": "secondary",
            "independence": "independent",
            "reliability": "high",
            "depth": "trivial"
        });
        let source: Source = serde_json::from_value(trivial).unwrap();
        assert!(!source.meets_standards());
    }

    #[test]
    fn test_source_list_skips_invalid_entries() {
        let list = SourceList::parse(
            r#"{"sources": [
                {"url": "https://a", "title": "A", "meets_standards": true, "rationale": "profile"},
                {"title": "missing url"},
                {"url": "https://b", "meets_standards": true}
            ]}"#,
        );
        assert_eq!(list.sources.len(), 2);
        assert!(score(&list.sources));
    }

    #[test]
    fn test_legacy_pending_request_is_tracked() {
        let mut value = json!({
            "id": "jane-doe",
            "is_notable": true,
            "openai_research_request_id": "resp_legacy",
            "sources": [],
            "openai_notability_request_id": null
        });
        assert!(NotabilityRecord::migrate(&mut value));
        let record: NotabilityRecord = serde_json::from_value(value.clone()).unwrap();

        let research = record.research.unwrap();
        assert_eq!(research.outcome, JobOutcome::Pending { job_id: "resp_legacy".into() });
        assert!(research.submitted_at.is_some());
        assert_eq!(research.prompt, default_notability_prompt());
        // a verdict without sources is discarded
        assert_eq!(record.is_notable, None);

        assert!(!NotabilityRecord::migrate(&mut value));
    }

    #[test]
    fn test_legacy_verdict_is_recomputed() {
        let mut value = json!({
            "id": "jane-doe",
            "is_notable": true,
            "openai_research_request_id": "resp_done",
            "sources": [
                {"url": "https://a", "title": "A", "meets_standards": true},
                {"url": "https://b", "title": "B", "meets_standards": false},
                {"title": "no url"}
            ],
            "created_at": "2025-07-24T18:02:11.123456"
        });
        assert!(NotabilityRecord::migrate(&mut value));
        let record: NotabilityRecord = serde_json::from_value(value).unwrap();

        assert_eq!(record.sources.len(), 2);
        assert_eq!(record.is_notable, Some(false));
        let research = record.research.unwrap();
        assert!(research.is_completed());
        assert_eq!(research.job_id(), Some("resp_done"));

        let mut untouched = json!({"id": "john-roe", "is_notable": false, "sources": []});
        assert!(NotabilityRecord::migrate(&mut untouched));
        let record: NotabilityRecord = serde_json::from_value(untouched).unwrap();
        assert_eq!(record.is_notable, None);
        assert!(record.research.is_none());
    }

    #[test]
    fn test_unparseable_payload_is_empty() {
        assert!(SourceList::parse("I could not find sources").sources.is_empty());
    }
}
