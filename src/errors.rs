use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Stable, client-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    RateLimited,
    InvalidRequest,
    ExamNotFound,
    TopicNotFound,
    SessionNotFound,
    SessionError,
    SaveError,
    ProcessingError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ExamNotFound => "EXAM_NOT_FOUND",
            ErrorCode::TopicNotFound => "TOPIC_NOT_FOUND",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionError => "SESSION_ERROR",
            ErrorCode::SaveError => "SAVE_ERROR",
            ErrorCode::ProcessingError => "PROCESSING_ERROR",
        }
    }
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Exam not found: {0}")]
    ExamNotFound(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Failed to create session: {0}")]
    Session(anyhow::Error),

    #[error("Failed to save answers: {0}")]
    Save(anyhow::Error),

    #[error("Processing failed: {0}")]
    Processing(anyhow::Error),
}

/// Error body returned to clients: `{error, code, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A fully mapped error response, ready to be returned from a handler.
#[derive(Debug)]
pub struct ApiFailure {
    pub status: StatusCode,
    pub body: ErrorBody,
    pub retry_after_secs: Option<u64>,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub expose_details: bool,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            expose_details: false,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    /// Internal error messages are only surfaced in development mode.
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.expose_details = dev_mode;
        self
    }
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Unauthorized => ErrorCode::Unauthorized,
            ApiError::Validation(_) => ErrorCode::InvalidRequest,
            ApiError::RateLimited { .. } => ErrorCode::RateLimited,
            ApiError::ExamNotFound(_) => ErrorCode::ExamNotFound,
            ApiError::TopicNotFound(_) => ErrorCode::TopicNotFound,
            ApiError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            ApiError::Session(_) => ErrorCode::SessionError,
            ApiError::Save(_) => ErrorCode::SaveError,
            ApiError::Processing(_) => ErrorCode::ProcessingError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ExamNotFound(_)
            | ApiError::TopicNotFound(_)
            | ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Session(_) | ApiError::Save(_) | ApiError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(self, context: ErrorContext) -> ApiFailure {
        let code = self.code();
        let status = self.status();
        let sanitized = crate::logging::sanitize_for_log(&self.to_string());

        let (message, details) = match &self {
            ApiError::Unauthorized => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    "Request without identity rejected"
                );
                ("Unauthorized".to_string(), None)
            }
            ApiError::Validation(reason) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %sanitized,
                    "Validation error"
                );
                ("Invalid request".to_string(), Some(reason.clone()))
            }
            ApiError::RateLimited { retry_after_secs } => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    retry_after_secs = retry_after_secs,
                    "Rate limit exceeded"
                );
                (
                    "Too many requests. Please try again later.".to_string(),
                    None,
                )
            }
            ApiError::ExamNotFound(_) | ApiError::TopicNotFound(_) | ApiError::SessionNotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %sanitized,
                    "Resource not found"
                );
                (format!("{} not found", context.resource_type), None)
            }
            ApiError::Session(_) | ApiError::Save(_) | ApiError::Processing(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %sanitized,
                    code = code.as_str(),
                    "Internal error"
                );
                let message = match code {
                    ErrorCode::SessionError => "Failed to start the session. Please try again.",
                    ErrorCode::SaveError => "Failed to save your answers. Please try again.",
                    _ => "Failed to process the request. Please try again.",
                };
                let details = context.expose_details.then(|| self.to_string());
                (message.to_string(), details)
            }
        };

        let retry_after_secs = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        ApiFailure {
            status,
            body: ErrorBody {
                error: message,
                code,
                details,
            },
            retry_after_secs,
        }
    }
}
