//! Scripted in-process job client

use super::{JobClient, JobStatus, PromptRequest, Submission};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    next_id: u64,
    statuses: HashMap<String, JobStatus>,
    status_errors: HashSet<String>,
    idempotent: HashMap<String, String>,
    prompt_payloads: HashMap<String, String>,
    default_payload: Option<String>,
    failing_submissions: usize,
    submissions: Vec<(String, PromptRequest)>,
    cancelled: Vec<String>,
}

/// Mock job client for testing.
///
/// Background jobs stay pending until the test completes or fails them.
/// Blocking submissions complete immediately with the payload registered
/// for their prompt id, or the default payload.
#[derive(Default)]
pub struct MockJobClient {
    state: Mutex<MockState>,
}

impl MockJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Payload returned by blocking submissions without a prompt-specific one
    pub fn set_default_payload(&self, payload: impl Into<String>) {
        let payload = payload.into();
        self.with_state(|s| s.default_payload = Some(payload));
    }

    /// Payload returned by blocking submissions of one prompt
    pub fn set_prompt_payload(&self, prompt_id: &str, payload: impl Into<String>) {
        let payload = payload.into();
        self.with_state(|s| {
            s.prompt_payloads.insert(prompt_id.to_string(), payload);
        });
    }

    /// Make the next `count` submissions fail at the API boundary
    pub fn fail_next_submissions(&self, count: usize) {
        self.with_state(|s| s.failing_submissions = count);
    }

    pub fn complete(&self, job_id: &str, payload: impl Into<String>) {
        let payload = payload.into();
        self.with_state(|s| {
            s.statuses
                .insert(job_id.to_string(), JobStatus::Completed(payload));
        });
    }

    pub fn fail(&self, job_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_state(|s| {
            s.statuses.insert(job_id.to_string(), JobStatus::Failed(reason));
        });
    }

    /// Make status queries for a job error out
    pub fn break_status(&self, job_id: &str) {
        self.with_state(|s| {
            s.status_errors.insert(job_id.to_string());
        });
    }

    /// Every accepted submission with the id it was given
    pub fn submissions(&self) -> Vec<(String, PromptRequest)> {
        self.with_state(|s| s.submissions.clone())
    }

    /// Job ids of accepted submissions for a prompt template
    pub fn job_ids_for_prompt(&self, prompt_id: &str) -> Vec<String> {
        self.with_state(|s| {
            s.submissions
                .iter()
                .filter(|(_, req)| req.prompt.id == prompt_id)
                .map(|(id, _)| id.clone())
                .collect()
        })
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.with_state(|s| s.cancelled.clone())
    }
}

#[async_trait]
impl JobClient for MockJobClient {
    async fn submit(&self, request: &PromptRequest) -> Result<Submission> {
        self.with_state(|s| {
            if s.failing_submissions > 0 {
                s.failing_submissions -= 1;
                return Err(AppError::upstream("mock submission failure"));
            }

            if let Some(key) = &request.idempotency_key {
                if let Some(existing) = s.idempotent.get(key) {
                    let status = s
                        .statuses
                        .get(existing)
                        .cloned()
                        .unwrap_or(JobStatus::Pending);
                    return Ok(Submission {
                        job_id: existing.clone(),
                        status,
                    });
                }
            }

            s.next_id += 1;
            let job_id = format!("resp_{:04}{:08x}", s.next_id, rand::random::<u32>());

            let status = if request.background {
                JobStatus::Pending
            } else {
                let payload = s
                    .prompt_payloads
                    .get(&request.prompt.id)
                    .or(s.default_payload.as_ref())
                    .cloned()
                    .unwrap_or_default();
                JobStatus::Completed(payload)
            };

            s.statuses.insert(job_id.clone(), status.clone());
            if let Some(key) = &request.idempotency_key {
                s.idempotent.insert(key.clone(), job_id.clone());
            }
            s.submissions.push((job_id.clone(), request.clone()));

            Ok(Submission { job_id, status })
        })
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.with_state(|s| {
            if s.status_errors.contains(job_id) {
                return Err(AppError::upstream(format!("mock status failure for {}", job_id)));
            }
            s.statuses
                .get(job_id)
                .cloned()
                .ok_or_else(|| AppError::upstream(format!("unknown job {}", job_id)))
        })
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        self.with_state(|s| {
            s.cancelled.push(job_id.to_string());
            if let Some(status) = s.statuses.get_mut(job_id) {
                if *status == JobStatus::Pending {
                    *status = JobStatus::Failed("cancelled".into());
                }
            }
        });
        Ok(())
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::PromptRef;
    use std::collections::BTreeMap;

    fn request() -> PromptRequest {
        PromptRequest::background(PromptRef::new("pmpt_a", "1"), BTreeMap::new())
    }

    #[tokio::test]
    async fn test_background_lifecycle() {
        let client = MockJobClient::new();
        let submission = client.submit(&request()).await.unwrap();
        assert_eq!(submission.status, JobStatus::Pending);
        assert_eq!(client.status(&submission.job_id).await.unwrap(), JobStatus::Pending);

        client.complete(&submission.job_id, "{}");
        assert_eq!(
            client.status(&submission.job_id).await.unwrap(),
            JobStatus::Completed("{}".into())
        );
    }

    #[tokio::test]
    async fn test_idempotency_key_reuses_job() {
        let client = MockJobClient::new();
        let first = client
            .submit(&request().with_idempotency_key("k1"))
            .await
            .unwrap();
        let second = client
            .submit(&request().with_idempotency_key("k1"))
            .await
            .unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(client.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_submissions() {
        let client = MockJobClient::new();
        client.fail_next_submissions(1);
        tokio_test::assert_err!(client.submit(&request()).await);
        tokio_test::assert_ok!(client.submit(&request()).await);
    }

    #[tokio::test]
    async fn test_cancel_marks_pending_failed() {
        let client = MockJobClient::new();
        let submission = client.submit(&request()).await.unwrap();
        client.cancel(&submission.job_id).await.unwrap();
        assert!(matches!(
            client.status(&submission.job_id).await.unwrap(),
            JobStatus::Failed(_)
        ));
        assert_eq!(client.cancelled(), vec![submission.job_id]);
    }
}
