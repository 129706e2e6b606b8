//! Submission and reconciliation of external jobs
//!
//! Every outstanding job is stamped with its submission time. A check first
//! applies the staleness window, then queries the external API:
//! - stale or reported failed: cancel best-effort and resubmit while the
//!   retry budget lasts, otherwise mark the job failed
//! - completed: parse the payload and store it; never touched again
//! - pending, or the status query errored: leave it alone

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::{JobOutcome, JobSet, Payload, Progress, Stage, TrackedJob};
use crate::config::JobsConfig;
use crate::llm::{JobClient, JobStatus, PromptRef, PromptRequest};
use crate::metrics::{record_job, record_reconcile, JobMetric};

/// Staleness window and retry budget for external jobs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }

    /// Strictly more than `timeout` has elapsed since submission
    pub fn is_stale(&self, submitted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - submitted_at).to_std() {
            Ok(elapsed) => elapsed > self.timeout,
            // submitted in the future: clock skew, not stale
            Err(_) => false,
        }
    }
}

/// One named sub-task to submit
#[derive(Clone, Debug, PartialEq)]
pub struct SubTaskSpec {
    pub key: String,
    pub prompt: PromptRef,
    pub variables: BTreeMap<String, String>,
    pub generation: u32,
}

impl SubTaskSpec {
    pub fn new(key: impl Into<String>, prompt: PromptRef, variables: BTreeMap<String, String>) -> Self {
        Self {
            key: key.into(),
            prompt,
            variables,
            generation: 0,
        }
    }

    /// Tag the sub-task with the run it belongs to
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }
}

/// Idempotency key for one submission attempt of a sub-task within one run
/// of its stage
pub fn idempotency_key(
    stage: Stage,
    entity_id: &str,
    job_key: &str,
    generation: u32,
    retry_count: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!("{}:{}:{}:{}:{}", stage, entity_id, job_key, generation, retry_count).as_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// What a single check did to a job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    Unchanged,
    Completed,
    /// Resubmitted under a new external id
    Retried { job_id: String },
    /// Resubmission attempted but the API rejected it
    Unsubmitted,
    Failed { reason: String },
}

/// Submits and reconciles jobs against the external API
#[derive(Clone)]
pub struct JobTracker {
    client: Arc<dyn JobClient>,
    policy: RetryPolicy,
}

impl JobTracker {
    pub fn new(client: Arc<dyn JobClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &Arc<dyn JobClient> {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit one sub-task in the background
    pub async fn submit<R>(
        &self,
        stage: Stage,
        entity_id: &str,
        spec: SubTaskSpec,
        now: DateTime<Utc>,
    ) -> TrackedJob<R> {
        let mut job = TrackedJob {
            prompt: spec.prompt,
            variables: spec.variables,
            outcome: JobOutcome::Unsubmitted {
                reason: "not yet submitted".to_string(),
            },
            submitted_at: None,
            retry_count: 0,
            generation: spec.generation,
        };
        self.dispatch(stage, entity_id, &spec.key, &mut job, now).await;
        job
    }

    /// Submit every sub-task of a stage concurrently
    #[instrument(skip(self, stage, specs, now), fields(stage = %stage, count = specs.len()))]
    pub async fn submit_set<R>(
        &self,
        stage: Stage,
        entity_id: &str,
        specs: Vec<SubTaskSpec>,
        now: DateTime<Utc>,
    ) -> JobSet<R> {
        let submissions = specs.into_iter().map(|spec| async move {
            let key = spec.key.clone();
            let job = self.submit(stage, entity_id, spec, now).await;
            (key, job)
        });

        let jobs: BTreeMap<String, TrackedJob<R>> = join_all(submissions).await.into_iter().collect();
        let accepted = jobs.values().filter(|job| job.job_id().is_some()).count();
        info!(accepted, total = jobs.len(), "Jobs submitted");

        JobSet {
            jobs,
            updated_at: now,
        }
    }

    /// Bring a single job up to date
    pub async fn check<R: Payload>(
        &self,
        stage: Stage,
        entity_id: &str,
        key: &str,
        job: &mut TrackedJob<R>,
        now: DateTime<Utc>,
    ) -> JobEvent {
        let job_id = match &job.outcome {
            JobOutcome::Completed { .. } | JobOutcome::Failed { .. } => return JobEvent::Unchanged,
            JobOutcome::Unsubmitted { reason } => {
                let reason = format!("submission failed: {}", reason);
                return self.retry_or_fail(stage, entity_id, key, job, reason, now).await;
            }
            JobOutcome::Pending { job_id } => job_id.clone(),
        };

        if let Some(submitted_at) = job.submitted_at {
            if self.policy.is_stale(submitted_at, now) {
                warn!(
                    stage = %stage,
                    entity_id,
                    key,
                    job_id = %job_id,
                    retry_count = job.retry_count,
                    "Job exceeded timeout"
                );
                self.cancel_quietly(&job_id).await;
                let reason = format!("timed out after {}s", self.policy.timeout.as_secs());
                return self.retry_or_fail(stage, entity_id, key, job, reason, now).await;
            }
        }

        match self.client.status(&job_id).await {
            Ok(JobStatus::Completed(payload)) => {
                debug!(stage = %stage, entity_id, key, job_id = %job_id, "Job completed");
                job.outcome = JobOutcome::Completed {
                    job_id,
                    result: R::parse(&payload),
                };
                record_job(JobMetric::Completed, stage.as_str());
                JobEvent::Completed
            }
            Ok(JobStatus::Failed(reason)) => {
                warn!(stage = %stage, entity_id, key, job_id = %job_id, reason = %reason, "Job reported failed");
                self.retry_or_fail(stage, entity_id, key, job, reason, now).await
            }
            Ok(JobStatus::Pending) => JobEvent::Unchanged,
            Err(e) => {
                // fail open: the job stays pending until the next check
                warn!(stage = %stage, entity_id, key, job_id = %job_id, error = %e, "Status query failed");
                record_job(JobMetric::StatusError, stage.as_str());
                JobEvent::Unchanged
            }
        }
    }

    /// Check every non-terminal job of a set and aggregate the result
    #[instrument(skip(self, stage, set, now), fields(stage = %stage))]
    pub async fn reconcile<R: Payload>(
        &self,
        stage: Stage,
        entity_id: &str,
        set: &mut JobSet<R>,
        now: DateTime<Utc>,
    ) -> Progress {
        let start = Instant::now();

        let checks = set.jobs.iter_mut().map(|(key, job)| async move {
            let event = self.check(stage, entity_id, key, job, now).await;
            (key.clone(), event)
        });
        let events = join_all(checks).await;

        let mut updated = Vec::new();
        let mut retried = Vec::new();
        let mut failed = Vec::new();
        for (key, event) in events {
            match event {
                JobEvent::Completed => updated.push(key),
                JobEvent::Retried { .. } | JobEvent::Unsubmitted => retried.push(key),
                JobEvent::Failed { .. } => failed.push(key),
                JobEvent::Unchanged => {}
            }
        }

        let mut progress = Progress::from_jobs(set.jobs.values(), updated, retried);
        progress.newly_failed = failed;
        if progress.changed() {
            set.updated_at = now;
        }

        record_reconcile(start.elapsed().as_secs_f64(), stage.as_str());
        debug!(
            total = progress.total,
            completed = progress.completed,
            failed = progress.failed,
            "Reconciled"
        );
        progress
    }

    /// Resubmit while budget remains, else mark terminal failure
    async fn retry_or_fail<R>(
        &self,
        stage: Stage,
        entity_id: &str,
        key: &str,
        job: &mut TrackedJob<R>,
        reason: String,
        now: DateTime<Utc>,
    ) -> JobEvent {
        if job.retry_count >= self.policy.max_retries {
            warn!(
                stage = %stage,
                entity_id,
                key,
                retry_count = job.retry_count,
                reason = %reason,
                "Job failed after exhausting retries"
            );
            job.outcome = JobOutcome::Failed {
                reason: reason.clone(),
            };
            job.submitted_at = None;
            record_job(JobMetric::Failed, stage.as_str());
            return JobEvent::Failed { reason };
        }

        job.retry_count += 1;
        record_job(JobMetric::Retried, stage.as_str());
        info!(stage = %stage, entity_id, key, retry_count = job.retry_count, "Resubmitting job");

        match self.dispatch(stage, entity_id, key, job, now).await {
            Some(job_id) => JobEvent::Retried { job_id },
            None => JobEvent::Unsubmitted,
        }
    }

    /// Submit the job's prompt under the key for its run and retry count
    async fn dispatch<R>(
        &self,
        stage: Stage,
        entity_id: &str,
        key: &str,
        job: &mut TrackedJob<R>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let request = PromptRequest::background(job.prompt.clone(), job.variables.clone())
            .with_idempotency_key(idempotency_key(
                stage,
                entity_id,
                key,
                job.generation,
                job.retry_count,
            ));

        match self.client.submit(&request).await {
            Ok(submission) => {
                record_job(JobMetric::Submitted, stage.as_str());
                job.outcome = JobOutcome::Pending {
                    job_id: submission.job_id.clone(),
                };
                job.submitted_at = Some(now);
                Some(submission.job_id)
            }
            Err(e) => {
                warn!(stage = %stage, entity_id, key, error = %e, "Job submission failed");
                record_job(JobMetric::SubmissionError, stage.as_str());
                job.outcome = JobOutcome::Unsubmitted {
                    reason: e.to_string(),
                };
                job.submitted_at = None;
                None
            }
        }
    }

    /// Cancel a job; errors are logged and dropped
    pub async fn cancel_quietly(&self, job_id: &str) {
        if let Err(e) = self.client.cancel(job_id).await {
            warn!(job_id, error = %e, "Cancel failed, ignoring");
        }
    }
}
