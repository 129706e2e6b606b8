//! External job client abstraction
//!
//! The hosted model API is consumed opaquely: submit a prompt template with
//! variables and get a job id back; poll the job id for a status and a text
//! payload; cancel best-effort.
//!
//! Providers:
//! - OpenAI Responses API (background mode)
//! - In-process mock for tests and local runs

mod mock;
mod openai;

pub use mock::MockJobClient;
pub use openai::OpenAiJobClient;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reference to a stored prompt template
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRef {
    pub id: String,
    pub version: String,
}

impl PromptRef {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// A single prompt execution request
#[derive(Clone, Debug, PartialEq)]
pub struct PromptRequest {
    pub prompt: PromptRef,
    pub variables: BTreeMap<String, String>,
    /// Run asynchronously; the job id is returned before completion
    pub background: bool,
    pub idempotency_key: Option<String>,
}

impl PromptRequest {
    pub fn background(prompt: PromptRef, variables: BTreeMap<String, String>) -> Self {
        Self {
            prompt,
            variables,
            background: true,
            idempotency_key: None,
        }
    }

    pub fn blocking(prompt: PromptRef, variables: BTreeMap<String, String>) -> Self {
        Self {
            prompt,
            variables,
            background: false,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Status of an external job
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// Opaque text payload of the finished job
    Completed(String),
    /// Failure reason reported by the API
    Failed(String),
}

/// Response to a submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    /// `Completed` straight away for blocking submissions
    pub status: JobStatus,
}

/// Trait for the external asynchronous prompt-execution API
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submit a prompt; returns as soon as the API accepted it
    async fn submit(&self, request: &PromptRequest) -> Result<Submission>;

    /// Query the current status of a job
    async fn status(&self, job_id: &str) -> Result<JobStatus>;

    /// Cancel a job; callers treat this as best-effort
    async fn cancel(&self, job_id: &str) -> Result<()>;

    /// Provider name for logs
    fn provider(&self) -> &str;
}

/// Run a blocking prompt and return its text payload
pub async fn run_blocking(client: &dyn JobClient, request: PromptRequest) -> Result<String> {
    let submission = client.submit(&request).await?;
    match submission.status {
        JobStatus::Completed(text) => Ok(text),
        JobStatus::Failed(reason) => Err(AppError::upstream(format!(
            "prompt {} failed: {}",
            request.prompt.id, reason
        ))),
        JobStatus::Pending => Err(AppError::upstream(format!(
            "prompt {} did not complete synchronously (job {})",
            request.prompt.id, submission.job_id
        ))),
    }
}

/// Create a job client based on configuration
pub fn create_job_client(config: &LlmConfig) -> Result<Arc<dyn JobClient>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| AppError::Configuration {
                    message: "OpenAI API key required (llm.api_key or OPENAI_API_KEY)".into(),
                })?;
            Ok(Arc::new(OpenAiJobClient::new(key, config)?))
        }
        "mock" => Ok(Arc::new(MockJobClient::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_completed() {
        let client = MockJobClient::new();
        client.set_default_payload(r#"{"entities": []}"#);
        let text = run_blocking(
            &client,
            PromptRequest::blocking(PromptRef::new("pmpt_ner", "9"), BTreeMap::new()),
        )
        .await
        .unwrap();
        assert_eq!(text, r#"{"entities": []}"#);
    }

    #[test]
    fn test_create_mock_client() {
        let config = LlmConfig {
            provider: "mock".into(),
            ..LlmConfig::default()
        };
        let client = create_job_client(&config).unwrap();
        assert_eq!(client.provider(), "mock");
    }

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..LlmConfig::default()
        };
        assert!(create_job_client(&config).is_err());
    }
}
