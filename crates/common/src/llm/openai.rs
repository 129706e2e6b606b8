//! OpenAI Responses API client

use super::{JobClient, JobStatus, PromptRequest, Submission};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// OpenAI job client
pub struct OpenAiJobClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    prompt: PromptBody<'a>,
    background: bool,
}

#[derive(Serialize)]
struct PromptBody<'a> {
    id: &'a str,
    version: &'a str,
    variables: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ResponseObject {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<ResponseError>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(default)]
    text: Option<String>,
}

impl ResponseObject {
    /// Text of the first content item of the last output message
    fn output_text(&self) -> Option<String> {
        self.output
            .iter()
            .rev()
            .find(|item| !item.content.is_empty())
            .and_then(|item| item.content.first())
            .and_then(|content| content.text.clone())
    }

    fn job_status(&self) -> JobStatus {
        match self.status.as_deref() {
            Some("completed") => JobStatus::Completed(self.output_text().unwrap_or_default()),
            Some("failed") => JobStatus::Failed(
                self.error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "failed".to_string()),
            ),
            Some("incomplete") => JobStatus::Failed(
                self.incomplete_details
                    .as_ref()
                    .map(|d| format!("incomplete: {}", d.reason))
                    .unwrap_or_else(|| "incomplete".to_string()),
            ),
            Some("cancelled") => JobStatus::Failed("cancelled".to_string()),
            _ => JobStatus::Pending,
        }
    }
}

impl OpenAiJobClient {
    /// Create a new OpenAI job client
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
        })
    }

    /// Send a request, retrying connection failures, 429 and 5xx responses
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        idempotency_key: Option<&str>,
    ) -> Result<ResponseObject> {
        let url = format!("{}{}", self.base_url, path);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..ExponentialBackoff::default()
        };

        let mut attempt = 0u32;
        backoff::future::retry(policy, || {
            attempt += 1;
            let current = attempt;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.api_key);
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }
            let max_retries = self.max_retries;

            async move {
                let classify = |err: AppError, transient: bool| {
                    if transient && current <= max_retries {
                        tracing::warn!(
                            attempt = current,
                            max_retries,
                            error = %err,
                            "Responses API request failed, retrying"
                        );
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                };

                let response = match request.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        let transient = e.is_connect() || e.is_timeout();
                        return Err(classify(AppError::HttpClient(e), transient));
                    }
                };

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    let transient =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    return Err(classify(
                        AppError::upstream(format!("Responses API error {}: {}", status, text)),
                        transient,
                    ));
                }

                response.json::<ResponseObject>().await.map_err(|e| {
                    backoff::Error::permanent(AppError::upstream(format!(
                        "Failed to parse Responses API payload: {}",
                        e
                    )))
                })
            }
        })
        .await
    }
}

#[async_trait]
impl JobClient for OpenAiJobClient {
    async fn submit(&self, request: &PromptRequest) -> Result<Submission> {
        let body = serde_json::to_value(ResponsesRequest {
            prompt: PromptBody {
                id: &request.prompt.id,
                version: &request.prompt.version,
                variables: &request.variables,
            },
            background: request.background,
        })?;

        let response = self
            .call(
                Method::POST,
                "/responses",
                Some(body),
                request.idempotency_key.as_deref(),
            )
            .await?;

        tracing::debug!(
            job_id = %response.id,
            prompt_id = %request.prompt.id,
            background = request.background,
            "Prompt submitted"
        );

        let status = response.job_status();
        Ok(Submission {
            job_id: response.id,
            status,
        })
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let response = self
            .call(Method::GET, &format!("/responses/{}", job_id), None, None)
            .await?;
        Ok(response.job_status())
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        self.call(
            Method::POST,
            &format!("/responses/{}/cancel", job_id),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    fn provider(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ResponseObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_completed_takes_last_message_text() {
        let response = parse(json!({
            "id": "resp_1",
            "status": "completed",
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [{"type": "output_text", "text": "{\"pages\": []}"}]}
            ]
        }));
        assert_eq!(
            response.job_status(),
            JobStatus::Completed("{\"pages\": []}".into())
        );
    }

    #[test]
    fn test_terminal_failures() {
        let failed = parse(json!({"id": "r", "status": "failed", "error": {"message": "quota"}}));
        assert_eq!(failed.job_status(), JobStatus::Failed("quota".into()));

        let incomplete = parse(json!({
            "id": "r",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"}
        }));
        assert_eq!(
            incomplete.job_status(),
            JobStatus::Failed("incomplete: max_output_tokens".into())
        );
    }

    #[test]
    fn test_in_progress_is_pending() {
        for status in ["queued", "in_progress"] {
            let response = parse(json!({"id": "r", "status": status}));
            assert_eq!(response.job_status(), JobStatus::Pending);
        }
    }

    #[test]
    fn test_request_body_shape() {
        let mut variables = BTreeMap::new();
        variables.insert("canonical_name".to_string(), "Jane Doe".to_string());
        let body = serde_json::to_value(ResponsesRequest {
            prompt: PromptBody {
                id: "pmpt_x",
                version: "8",
                variables: &variables,
            },
            background: true,
        })
        .unwrap();
        assert_eq!(body["prompt"]["variables"]["canonical_name"], "Jane Doe");
        assert_eq!(body["background"], true);
    }
}
