use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::request::Parts,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{ContentLocale, EngineConfig},
    content_cache::{ContentCache, ModuleStore},
    errors::{ApiError, ApiFailure, ErrorContext},
    learning_service::{LearningService, TopicContent},
    llm_service::LLMService,
    models::*,
    orchestrator::SubmissionOrchestrator,
    practice_selector::PracticeSelector,
    practice_service::{practice_saved_message, PracticeService},
    rate_limiter::InMemoryRateLimiter,
    retry::with_deadline,
    store::AssessmentStore,
    weakness_analyzer::WeaknessAnalyzer,
};

use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SubmissionOrchestrator,
    pub learning: LearningService,
    pub practice: PracticeService,
    pub store: Arc<dyn AssessmentStore>,
    pub persistence_timeout: Duration,
    pub dev_mode: bool,
    pub locale: ContentLocale,
}

impl AppState {
    /// Wire every service from one configuration. Each quota gets its own limiter.
    pub fn build(
        config: &EngineConfig,
        store: Arc<dyn AssessmentStore>,
        modules: Arc<dyn ModuleStore>,
        llm_service: LLMService,
    ) -> Self {
        let llm_service = llm_service
            .with_timeout(config.generation_timeout())
            .with_locale(config.content_locale);

        let orchestrator = SubmissionOrchestrator::new(
            store.clone(),
            WeaknessAnalyzer::new(llm_service.clone()),
            Arc::new(InMemoryRateLimiter::new(
                config.submissions_per_window,
                config.rate_limit_window(),
            )),
            config.max_answers_per_submission,
            config.persistence_timeout(),
        );

        let learning = LearningService::new(
            store.clone(),
            ContentCache::new(modules),
            llm_service,
            Arc::new(InMemoryRateLimiter::new(
                config.learn_generations_per_window,
                config.rate_limit_window(),
            )),
            config.persistence_timeout(),
        );

        let practice = PracticeService::new(
            store.clone(),
            PracticeSelector::new(config.practice_limit, config.content_locale),
            config.max_answers_per_submission,
            config.persistence_timeout(),
            config.content_locale,
        );

        Self {
            orchestrator,
            learning,
            practice,
            store,
            persistence_timeout: config.persistence_timeout(),
            dev_mode: config.dev_mode,
            locale: config.content_locale,
        }
    }

    fn context(&self, operation: &str, resource_type: &str) -> ErrorContext {
        ErrorContext::new(operation, resource_type).with_dev_mode(self.dev_mode)
    }
}

/// Identity supplied by the authentication layer in front of this service.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub display_name: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiFailure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match header(USER_ID_HEADER) {
            Some(id) => Ok(AuthenticatedUser {
                id,
                display_name: header(USER_NAME_HEADER),
            }),
            None => Err(ApiError::Unauthorized
                .to_response_with_context(ErrorContext::new(parts.uri.path(), "identity"))),
        }
    }
}

fn body_or_invalid<T>(payload: Result<Json<T>, JsonRejection>, context: ErrorContext) -> Result<T, ApiFailure> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()).to_response_with_context(context))
}

// Diagnostic endpoints

pub async fn submit_diagnostic(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<DiagnosticRequest>, JsonRejection>,
) -> Result<Json<DiagnosticResponse>, ApiFailure> {
    log_api_start!("submit_diagnostic", user = user.id);
    let request = body_or_invalid(payload, state.context("submit_diagnostic", "diagnostic"))?;

    match state
        .orchestrator
        .submit(&user.id, &request.exam_type, &request.answers)
        .await
    {
        Ok(outcome) => {
            log_api_success!(
                "submit_diagnostic",
                user = user.id,
                format!("session {} analyzed via {:?}", outcome.session_id, outcome.source)
            );
            Ok(Json(DiagnosticResponse {
                weakness_topics: outcome.topics,
            }))
        }
        Err(e) => Err(e.to_response_with_context(state.context("submit_diagnostic", "diagnostic"))),
    }
}

pub async fn latest_diagnostic(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<LatestDiagnosticResponse>, ApiFailure> {
    log_api_start!("latest_diagnostic", user = user.id);
    let context = || state.context("latest_diagnostic", "Diagnostic session");

    let session = with_deadline(
        state.persistence_timeout,
        "latest_completed_diagnostic",
        state.store.latest_completed_diagnostic(&user.id),
    )
    .await
    .map_err(|e| {
        log_api_error!("latest_diagnostic", error = e, "lookup failed");
        ApiError::Processing(e).to_response_with_context(context())
    })?
    .ok_or_else(|| ApiError::SessionNotFound(user.id.clone()).to_response_with_context(context()))?;

    Ok(Json(LatestDiagnosticResponse {
        session_id: session.id,
        exam_id: session.exam_id,
        weakness_topics: session.result_summary.unwrap_or_default(),
        completed_at: session.completed_at,
    }))
}

// Learning endpoints

pub async fn get_learning_module(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(topic_id): Path<String>,
) -> Result<Json<Value>, ApiFailure> {
    log_api_start!("get_learning_module", topic_id = topic_id);

    let content = state
        .learning
        .topic_content(&user.id, user.display_name.as_deref(), &topic_id)
        .await
        .map_err(|e| {
            e.to_response_with_context(state.context("get_learning_module", "Topic").with_id(&topic_id))
        })?;

    match content {
        TopicContent::Module { module, cached, generated } => {
            log_api_success!(
                "get_learning_module",
                user = user.id,
                format!("cached={} generated={}", cached, generated)
            );
            Ok(Json(json!({ "learningModule": module, "cached": cached })))
        }
        TopicContent::NoErrors { message, .. } => {
            log_api_success!("get_learning_module", user = user.id, "no recorded errors");
            Ok(Json(json!({
                "error": "No learning needed",
                "code": "NO_ERRORS_FOUND",
                "message": message,
            })))
        }
    }
}

// Practice endpoints

pub async fn get_practice_set(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(topic_id): Path<String>,
) -> Result<Json<PracticeSetResponse>, ApiFailure> {
    log_api_start!("get_practice_set", topic_id = topic_id);

    let response = state
        .practice
        .practice_set(&user.id, &topic_id)
        .await
        .map_err(|e| e.to_response_with_context(state.context("get_practice_set", "Topic").with_id(&topic_id)))?;

    if response.practice_questions.is_empty() {
        log_api_warn!("get_practice_set", user = user.id, "empty practice pool");
    } else {
        log_api_success!("get_practice_set", count = response.practice_questions.len(), "practice set served");
    }
    Ok(Json(response))
}

pub async fn submit_practice(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(topic_id): Path<String>,
    payload: Result<Json<PracticeSubmission>, JsonRejection>,
) -> Result<Json<PracticeResultResponse>, ApiFailure> {
    log_api_start!("submit_practice", user = user.id);
    let context = || state.context("submit_practice", "Topic").with_id(&topic_id);
    let submission = body_or_invalid(payload, context())?;

    let summary = state
        .practice
        .submit_practice(&user.id, &topic_id, &submission)
        .await
        .map_err(|e| e.to_response_with_context(context()))?;

    log_api_success!(
        "submit_practice",
        user = user.id,
        format!("{}% on {} questions", summary.score_percentage, summary.total_questions)
    );
    Ok(Json(PracticeResultResponse {
        message: practice_saved_message(state.locale).to_string(),
        summary,
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // Diagnostic routes
        .route("/api/diagnostic", post(submit_diagnostic))
        .route("/api/diagnostic/latest", get(latest_diagnostic))
        // Learning routes
        .route("/api/learn/:topic_id", get(get_learning_module))
        // Practice routes
        .route("/api/practice/:topic_id", get(get_practice_set).post(submit_practice))
        .with_state(state)
}
