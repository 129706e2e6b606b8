//! Research and writing drafts: one tracked job per section

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::EntityCategory;
use crate::config::default_research_plans;
use crate::db::{normalize_timestamps, Record};
use crate::jobs::{JobOutcome, JobSet, Payload, TrackedJob};
use crate::llm::PromptRef;

/// Per-section research jobs for one entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchDraft {
    pub id: String,

    pub category: EntityCategory,

    #[serde(default)]
    pub jobs: JobSet<ResearchSection>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ResearchDraft {
    pub fn new(id: impl Into<String>, category: EntityCategory, jobs: JobSet<ResearchSection>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            category,
            jobs,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for ResearchDraft {
    const COLLECTION: &'static str = "research_drafts";

    fn id(&self) -> &str {
        &self.id
    }

    /// Early drafts stored `type` plus parallel `statuses` (`{section}_id`)
    /// and `results` maps instead of a job set.
    fn migrate(value: &mut Value) -> bool {
        let Some(obj) = value.as_object_mut() else {
            return false;
        };
        let mut changed = false;

        if let Some(kind) = obj.remove("type") {
            obj.entry("category").or_insert(kind);
            changed = true;
        }

        if !obj.contains_key("jobs") {
            let statuses = obj.remove("statuses");
            let results = obj.remove("results");
            let category = obj
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("venture_capitalist")
                .to_string();
            if let Ok(jobs) = serde_json::to_value(legacy_jobs(&category, statuses, results)) {
                obj.insert("jobs".to_string(), jobs);
                changed = true;
            }
        }

        changed |= normalize_timestamps(obj);
        changed
    }
}

/// Rebuild a job set from the legacy `statuses` / `results` maps. A stored
/// result means the section completed; a bare job id is still pending.
fn legacy_jobs(category: &str, statuses: Option<Value>, results: Option<Value>) -> JobSet<Value> {
    let now = Utc::now();
    let statuses = as_map(statuses);
    let results = as_map(results);
    let plan = default_research_plans().remove(category).unwrap_or_default();

    let sections: BTreeSet<String> = statuses
        .keys()
        .map(|key| key.strip_suffix("_id").unwrap_or(key).to_string())
        .chain(results.keys().cloned())
        .collect();

    let jobs = sections
        .into_iter()
        .map(|section| {
            let job_id = statuses
                .get(&format!("{}_id", section))
                .and_then(Value::as_str)
                .map(str::to_string);
            let result = results.get(&section).filter(|r| r.is_object()).cloned();
            let prompt = plan.get(&section).map(|p| p.prompt_ref());

            let (outcome, submitted_at) = match (result, job_id, &prompt) {
                (Some(result), job_id, _) => (
                    JobOutcome::Completed {
                        job_id: job_id.unwrap_or_default(),
                        result,
                    },
                    None,
                ),
                (None, Some(job_id), _) => (JobOutcome::Pending { job_id }, Some(now)),
                (None, None, Some(_)) => (
                    JobOutcome::Unsubmitted {
                        reason: "no job recorded".to_string(),
                    },
                    None,
                ),
                (None, None, None) => (
                    JobOutcome::Failed {
                        reason: format!("unknown section {}", section),
                    },
                    None,
                ),
            };

            let job = TrackedJob {
                prompt: prompt.unwrap_or_else(|| PromptRef::new("", "")),
                variables: BTreeMap::new(),
                outcome,
                submitted_at,
                retry_count: 0,
                generation: 0,
            };
            (section, job)
        })
        .collect();

    JobSet {
        jobs,
        updated_at: now,
    }
}

fn as_map(value: Option<Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Research payload of one section: `{"pages": [...]}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchSection {
    #[serde(default, deserialize_with = "lenient_pages")]
    pub pages: Vec<ResearchPage>,
}

impl Payload for ResearchSection {}

impl ResearchSection {
    /// Page summaries joined into prompt-ready text
    pub fn content(&self) -> String {
        self.pages
            .iter()
            .filter(|page| !page.detail.text().is_empty())
            .map(|page| format!("Source: {}\n{}", page.page_title, page.detail.text()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchPage {
    #[serde(default)]
    pub page_title: String,

    #[serde(default)]
    pub url: String,

    #[serde(flatten)]
    pub detail: PageDetail,
}

/// Page summary, one variant per payload schema version
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageDetail {
    Exhaustive { exhaustive_description: String },
    Brief { description: String },
}

impl PageDetail {
    pub fn text(&self) -> &str {
        match self {
            PageDetail::Exhaustive { exhaustive_description } => exhaustive_description,
            PageDetail::Brief { description } => description,
        }
    }
}

fn lenient_pages<'de, D>(deserializer: D) -> Result<Vec<ResearchPage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect())
}

/// Per-section writing jobs for one entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WritingDraft {
    pub id: String,

    pub category: EntityCategory,

    #[serde(default)]
    pub jobs: JobSet<WritingSection>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl WritingDraft {
    pub fn new(id: impl Into<String>, category: EntityCategory, jobs: JobSet<WritingSection>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            category,
            jobs,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for WritingDraft {
    const COLLECTION: &'static str = "writing_drafts";

    fn id(&self) -> &str {
        &self.id
    }

    fn migrate(value: &mut Value) -> bool {
        let Some(obj) = value.as_object_mut() else {
            return false;
        };
        let mut changed = false;
        if let Some(kind) = obj.remove("type") {
            obj.entry("category").or_insert(kind);
            changed = true;
        }
        changed |= normalize_timestamps(obj);
        changed
    }
}

/// Writing payload of one article section
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WritingSection {
    #[serde(default)]
    pub blocks: Vec<Value>,

    #[serde(default)]
    pub references: Vec<Value>,
}

impl Payload for WritingSection {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_schema_versions() {
        let section = ResearchSection::parse(
            r#"{"pages": [
                {"page_title": "Profile", "url": "https://a", "exhaustive_description": "Long form"},
                {"page_title": "Interview", "url": "https://b", "description": "Short"},
                {"page_title": "Empty"}
            ]}"#,
        );
        assert_eq!(section.pages.len(), 2);
        assert!(matches!(section.pages[0].detail, PageDetail::Exhaustive { .. }));
        assert!(matches!(section.pages[1].detail, PageDetail::Brief { .. }));
        assert_eq!(
            section.content(),
            "Source: Profile\nLong form\n\nSource: Interview\nShort"
        );
    }

    #[test]
    fn test_legacy_research_draft() {
        let mut value = json!({
            "id": "jane-doe",
            "type": "venture_capitalist",
            "statuses": {
                "early_life_id": "resp_1",
                "vc_career_id": "resp_2",
                "personal_life_id": null
            },
            "results": {
                "early_life": {"pages": [{"page_title": "Profile", "url": "https://a", "description": "Grew up"}]},
                "vc_career": null,
                "personal_life": null
            },
            "created_at": "2025-07-24T18:02:11.123456",
            "updated_at": "2025-07-24T18:05:00.000001"
        });
        assert!(ResearchDraft::migrate(&mut value));
        let draft: ResearchDraft = serde_json::from_value(value.clone()).unwrap();

        assert_eq!(draft.category, EntityCategory::VentureCapitalist);
        assert_eq!(draft.created_at.to_rfc3339(), "2025-07-24T18:02:11.123456+00:00");

        let early = &draft.jobs.jobs["early_life"];
        assert!(early.is_completed());
        assert_eq!(early.job_id(), Some("resp_1"));
        assert_eq!(early.result().unwrap().content(), "Source: Profile\nGrew up");

        let vc = &draft.jobs.jobs["vc_career"];
        assert_eq!(vc.outcome, JobOutcome::Pending { job_id: "resp_2".into() });
        assert!(vc.submitted_at.is_some());
        assert_eq!(vc.prompt.id, "pmpt_68816c254784819792b04926ab25312c0ae69cb869929a41");

        assert!(matches!(
            draft.jobs.jobs["personal_life"].outcome,
            JobOutcome::Unsubmitted { .. }
        ));
        assert_eq!(draft.jobs.statuses()["personal_life_id"], None);

        // current layout is left alone
        assert!(!ResearchDraft::migrate(&mut value));
    }

    #[test]
    fn test_writing_draft_timestamps() {
        let mut value = json!({
            "id": "jane-doe",
            "type": "venture_capitalist",
            "jobs": {"jobs": {}, "updated_at": "2025-07-24T18:05:00Z"},
            "created_at": "2025-07-24T18:02:11"
        });
        assert!(WritingDraft::migrate(&mut value));
        let draft: WritingDraft = serde_json::from_value(value).unwrap();
        assert_eq!(draft.category, EntityCategory::VentureCapitalist);
        assert_eq!(draft.created_at.to_rfc3339(), "2025-07-24T18:02:11+00:00");
    }

    #[test]
    fn test_writing_section_fallback() {
        assert_eq!(WritingSection::parse("<html>"), WritingSection::default());
        let parsed = WritingSection::parse(r##"{"blocks": [{"type": "h2", "text": "Early life"}]}"##);
        assert_eq!(parsed.blocks.len(), 1);
        assert!(parsed.references.is_empty());
    }
}
