//! Tracking of asynchronous external jobs
//!
//! Provides:
//! - The per-sub-task job record (`TrackedJob`) and its outcome variants
//! - Named sets of sub-tasks belonging to one entity stage (`JobSet`)
//! - Payload parsing with empty-shape fallback
//! - The submission / reconciliation engine (`JobTracker`)
//! - A periodic reconciliation sweep (`Sweeper`)

mod sweeper;
mod tracker;

pub use sweeper::{SweepReport, SweepTarget, Sweeper, SweeperConfig};
pub use tracker::{idempotency_key, JobEvent, JobTracker, RetryPolicy, SubTaskSpec};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::llm::PromptRef;

/// Pipeline stage a job belongs to; used for idempotency keys, logs and metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    NotabilityResearch,
    SectionResearch,
    ArticleDraft,
    ArticleWriting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::NotabilityResearch => "notability_research",
            Stage::SectionResearch => "section_research",
            Stage::ArticleDraft => "article_draft",
            Stage::ArticleWriting => "article_writing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a single sub-task stands
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobOutcome<R> {
    /// Accepted by the external API, waiting for completion
    Pending { job_id: String },
    /// The submission call itself failed; resubmitted on reconciliation
    Unsubmitted { reason: String },
    /// Terminal success; never overwritten afterwards
    Completed { job_id: String, result: R },
    /// Terminal failure after the retry budget ran out
    Failed { reason: String },
}

/// One external job and everything needed to resubmit it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedJob<R> {
    pub prompt: PromptRef,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    pub outcome: JobOutcome<R>,

    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub retry_count: u32,

    /// Run of the stage this job belongs to; bumped on every restart
    #[serde(default)]
    pub generation: u32,
}

impl<R> TrackedJob<R> {
    /// External id while the job is in flight or after it completed
    pub fn job_id(&self) -> Option<&str> {
        match &self.outcome {
            JobOutcome::Pending { job_id } | JobOutcome::Completed { job_id, .. } => {
                Some(job_id.as_str())
            }
            JobOutcome::Unsubmitted { .. } | JobOutcome::Failed { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&R> {
        match &self.outcome {
            JobOutcome::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed { .. })
    }

    /// Completed or failed; reconciliation leaves it alone
    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failed()
    }

    /// Short status label exposed over the API
    pub fn status_label(&self) -> &'static str {
        match self.outcome {
            JobOutcome::Pending { .. } | JobOutcome::Unsubmitted { .. } => "pending",
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Failed { .. } => "failed",
        }
    }
}

/// The named sub-tasks of one entity stage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSet<R> {
    pub jobs: BTreeMap<String, TrackedJob<R>>,

    pub updated_at: DateTime<Utc>,
}

impl<R> Default for JobSet<R> {
    fn default() -> Self {
        Self {
            jobs: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl<R: Clone + Serialize> JobSet<R> {
    /// `{job_key + "_id" -> external id | null}`
    pub fn statuses(&self) -> BTreeMap<String, Option<String>> {
        self.jobs
            .iter()
            .map(|(key, job)| (format!("{}_id", key), job.job_id().map(str::to_string)))
            .collect()
    }

    /// `{job_key -> parsed result | null}`
    pub fn results(&self) -> BTreeMap<String, Option<Value>> {
        self.jobs
            .iter()
            .map(|(key, job)| {
                let value = job
                    .result()
                    .and_then(|r| serde_json::to_value(r).ok());
                (key.clone(), value)
            })
            .collect()
    }

    /// Results of completed sub-tasks only
    pub fn completed_results(&self) -> BTreeMap<String, R> {
        self.jobs
            .iter()
            .filter_map(|(key, job)| job.result().map(|r| (key.clone(), r.clone())))
            .collect()
    }
}

impl<R> JobSet<R> {
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(TrackedJob::is_completed)
    }

    pub fn has_failed(&self) -> bool {
        self.jobs.values().any(TrackedJob::is_failed)
    }

    /// True while any sub-task can still make progress
    pub fn in_flight(&self) -> bool {
        self.jobs.values().any(|job| !job.is_terminal())
    }

    /// External ids of jobs still waiting on the API
    pub fn pending_job_ids(&self) -> Vec<String> {
        self.jobs
            .values()
            .filter_map(|job| match &job.outcome {
                JobOutcome::Pending { job_id } => Some(job_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Run number shared by the set's jobs
    pub fn generation(&self) -> u32 {
        self.jobs.values().map(|job| job.generation).max().unwrap_or(0)
    }

    /// Aggregate counters without touching the external API
    pub fn progress(&self) -> Progress {
        Progress::from_jobs(self.jobs.values(), Vec::new(), Vec::new())
    }
}

/// Aggregate completion state of a job set after a reconciliation pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub failed: usize,
    pub percentage: f64,
    /// Sub-task keys that completed during this call
    pub updated: Vec<String>,
    /// Sub-task keys resubmitted during this call
    pub retried: Vec<String>,
    /// Sub-task keys that failed terminally during this call
    #[serde(default)]
    pub newly_failed: Vec<String>,
    pub is_complete: bool,
    pub has_failed: bool,
}

impl Progress {
    pub(crate) fn from_jobs<'a, R: 'a>(
        jobs: impl Iterator<Item = &'a TrackedJob<R>>,
        updated: Vec<String>,
        retried: Vec<String>,
    ) -> Self {
        let mut total = 0;
        let mut completed = 0;
        let mut failed = 0;
        for job in jobs {
            total += 1;
            if job.is_completed() {
                completed += 1;
            } else if job.is_failed() {
                failed += 1;
            }
        }

        let percentage = if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64) * 100.0
        };

        Self {
            total,
            completed,
            pending: total - completed,
            failed,
            percentage,
            updated,
            retried,
            newly_failed: Vec::new(),
            is_complete: completed == total,
            has_failed: failed > 0,
        }
    }

    /// Aggregate status label: `completed`, `failed` or `pending`
    pub fn status_label(&self) -> &'static str {
        if self.is_complete {
            "completed"
        } else if self.has_failed {
            "failed"
        } else {
            "pending"
        }
    }

    pub fn changed(&self) -> bool {
        !self.updated.is_empty() || !self.retried.is_empty() || !self.newly_failed.is_empty()
    }
}

/// Parsed shape of a completed job's opaque text payload
pub trait Payload: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// Parse the payload, degrading to the empty shape on malformed text
    fn parse(raw: &str) -> Self {
        match serde_json::from_str(strip_code_fence(raw)) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable job payload, using empty result");
                Self::default()
            }
        }
    }
}

/// Models sometimes wrap JSON in a markdown fence
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Pages {
        #[serde(default)]
        pages: Vec<String>,
    }

    impl Payload for Pages {}

    fn job(outcome: JobOutcome<Pages>) -> TrackedJob<Pages> {
        TrackedJob {
            prompt: PromptRef::new("pmpt_test", "1"),
            variables: BTreeMap::new(),
            outcome,
            submitted_at: Some(Utc::now()),
            retry_count: 0,
            generation: 0,
        }
    }

    fn sample_set() -> JobSet<Pages> {
        let mut set = JobSet::default();
        set.jobs.insert(
            "early_life".into(),
            job(JobOutcome::Completed {
                job_id: "resp_1".into(),
                result: Pages { pages: vec!["a".into()] },
            }),
        );
        set.jobs.insert(
            "vc_career".into(),
            job(JobOutcome::Pending { job_id: "resp_2".into() }),
        );
        set.jobs.insert(
            "personal_life".into(),
            job(JobOutcome::Unsubmitted { reason: "503".into() }),
        );
        set
    }

    #[test]
    fn test_statuses_and_results_share_keys() {
        let set = sample_set();
        let statuses = set.statuses();
        let results = set.results();

        let status_keys: Vec<String> = statuses
            .keys()
            .map(|k| k.trim_end_matches("_id").to_string())
            .collect();
        let result_keys: Vec<String> = results.keys().cloned().collect();
        assert_eq!(status_keys, result_keys);

        assert_eq!(statuses["vc_career_id"].as_deref(), Some("resp_2"));
        assert_eq!(statuses["personal_life_id"], None);
        assert!(results["early_life"].is_some());
        assert!(results["vc_career"].is_none());
    }

    #[test]
    fn test_progress_counts() {
        let progress = sample_set().progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.pending, 2);
        assert_eq!(progress.failed, 0);
        assert!(!progress.is_complete);
        assert_eq!(progress.status_label(), "pending");
    }

    #[test]
    fn test_empty_set_progress() {
        let progress = JobSet::<Pages>::default().progress();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.percentage, 0.0);
        assert!(progress.is_complete);
    }

    #[test]
    fn test_payload_parse_fallback() {
        assert_eq!(Pages::parse("not json"), Pages::default());
        assert_eq!(
            Pages::parse("```json\n{\"pages\": [\"x\"]}\n```"),
            Pages { pages: vec!["x".into()] }
        );
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let value = serde_json::to_value(job(JobOutcome::Pending { job_id: "resp_9".into() })).unwrap();
        assert_eq!(value["outcome"]["state"], "pending");
        assert_eq!(value["outcome"]["job_id"], "resp_9");
    }
}
