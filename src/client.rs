use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::{ErrorBody, ErrorCode};
use crate::models::{Answer, DiagnosticRequest, DiagnosticResponse, PracticeResultResponse, PracticeSubmission};
use crate::retry::{retry_with_backoff, RetryPolicy, Retryable};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not reach server: {0}")]
    Connect(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request rejected with status {status}: {message}")]
    Rejected {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            ClientError::Connect(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Other(err.to_string())
        }
    }
}

impl Retryable for ClientError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_) | ClientError::Connect(_) | ClientError::Server { .. }
        )
    }

    fn timed_out(after: Duration) -> Self {
        ClientError::Timeout(after)
    }
}

/// HTTP client for the submission endpoints, retrying transient failures
/// with exponential backoff. Rejections (4xx) are returned immediately.
#[derive(Debug, Clone)]
pub struct DiagnosticClient {
    http: Client,
    base_url: String,
    user_id: String,
    policy: RetryPolicy,
}

impl DiagnosticClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_policy(base_url, user_id, RetryPolicy::default())
    }

    pub fn with_policy(base_url: impl Into<String>, user_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            policy,
        }
    }

    pub async fn submit_diagnostic(&self, exam_type: &str, answers: &[Answer]) -> Result<DiagnosticResponse, ClientError> {
        let request = DiagnosticRequest {
            exam_type: exam_type.to_string(),
            answers: answers.to_vec(),
        };
        self.post_json("/api/diagnostic", &request).await
    }

    pub async fn submit_practice(&self, submission: &PracticeSubmission) -> Result<PracticeResultResponse, ClientError> {
        let path = format!("/api/practice/{}", submission.topic_id);
        self.post_json(&path, submission).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        retry_with_backoff(&self.policy, path, |attempt| {
            let url = url.clone();
            async move {
                debug!(url = %url, attempt = attempt, "POST");
                let response = self
                    .http
                    .post(&url)
                    .header(USER_ID_HEADER, &self.user_id)
                    .json(body)
                    .send()
                    .await?;
                Self::read_response(response).await
            }
        })
        .await
    }

    async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| ClientError::Decode(e.to_string()));
        }

        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() {
            return Err(ClientError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        Err(ClientError::Rejected {
            status: status.as_u16(),
            code: parsed.as_ref().map(|error| error.code),
            message: parsed
                .map(|error| error.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request rejected").to_string()),
            retry_after_secs: retry_after_secs.filter(|_| status == StatusCode::TOO_MANY_REQUESTS),
        })
    }
}
