use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::{Answer, AnswerRecord, ExamType, SessionKind, WeaknessTopic};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::retry::with_deadline;
use crate::store::AssessmentStore;
use crate::weakness_analyzer::{AnalysisError, AnalysisSource, WeaknessAnalyzer};
use crate::{log_service_error, log_service_start, log_service_success, log_service_warn, log_validation};

const SERVICE: &str = "submission_orchestrator";

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub session_id: Uuid,
    pub topics: Vec<WeaknessTopic>,
    pub source: AnalysisSource,
    /// False when the topics were computed but the session could not be marked completed.
    pub summary_persisted: bool,
}

/// Drives one diagnostic submission:
/// validate, rate limit, open session, store answers, analyze, complete session.
///
/// Nothing is persisted before validation and the rate limit pass. Once the
/// session exists, a failed answer insert abandons it; a failed final status
/// update is logged and the computed topics are still returned.
#[derive(Clone)]
pub struct SubmissionOrchestrator {
    store: Arc<dyn AssessmentStore>,
    analyzer: WeaknessAnalyzer,
    rate_limiter: Arc<dyn RateLimiter>,
    max_answers: usize,
    persistence_timeout: Duration,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        analyzer: WeaknessAnalyzer,
        rate_limiter: Arc<dyn RateLimiter>,
        max_answers: usize,
        persistence_timeout: Duration,
    ) -> Self {
        Self {
            store,
            analyzer,
            rate_limiter,
            max_answers,
            persistence_timeout,
        }
    }

    /// Reject bad input before anything is counted or stored.
    pub fn validate(&self, exam_type: &str, answers: &[Answer]) -> Result<ExamType, ApiError> {
        let exam = ExamType::parse(exam_type)
            .ok_or_else(|| ApiError::Validation(format!("Unknown exam type '{}'", exam_type)))?;

        if answers.is_empty() {
            return Err(ApiError::Validation("At least one answer is required".to_string()));
        }
        if answers.len() > self.max_answers {
            return Err(ApiError::Validation(format!(
                "Too many answers: {} (maximum {})",
                answers.len(),
                self.max_answers
            )));
        }
        if let Some(violation) = answers.iter().find_map(Answer::invariant_violation) {
            return Err(ApiError::Validation(violation));
        }

        log_validation!(success, SERVICE, format!("{} answers for {}", answers.len(), exam));
        Ok(exam)
    }

    pub async fn submit(&self, user_id: &str, exam_type: &str, answers: &[Answer]) -> Result<SubmissionOutcome, ApiError> {
        let started = Instant::now();
        log_service_start!(SERVICE, "submit", answer_count = answers.len());

        let exam_type = self.validate(exam_type, answers).inspect_err(|e| {
            log_validation!(failure, SERVICE, error = e);
        })?;

        if let RateLimitDecision::Limited { retry_after_secs } = self.rate_limiter.check(user_id).await {
            return Err(ApiError::RateLimited { retry_after_secs });
        }

        let exam = with_deadline(self.persistence_timeout, "find_exam", self.store.find_exam(exam_type))
            .await
            .map_err(ApiError::Processing)?
            .ok_or_else(|| ApiError::ExamNotFound(exam_type.to_string()))?;

        let session = with_deadline(
            self.persistence_timeout,
            "create_session",
            self.store
                .create_session(user_id, &exam.id, SessionKind::Diagnostic),
        )
        .await
        .map_err(ApiError::Session)?;

        let records: Vec<AnswerRecord> = answers.iter().map(AnswerRecord::from).collect();
        if let Err(e) = with_deadline(
            self.persistence_timeout,
            "insert_answers",
            self.store.insert_answers(session.id, user_id, &records),
        )
        .await
        {
            log_service_error!(SERVICE, "insert_answers", session_id = session.id, error = e);
            self.abandon(session.id).await;
            return Err(ApiError::Save(e));
        }

        let analysis = match self.analyzer.analyze(exam_type, answers).await {
            Ok(analysis) => analysis,
            Err(AnalysisError::EmptyInput) => {
                self.abandon(session.id).await;
                return Err(ApiError::Validation("At least one answer is required".to_string()));
            }
        };

        let summary_persisted = match with_deadline(
            self.persistence_timeout,
            "complete_session",
            self.store.complete_session(session.id, &analysis.topics),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                log_service_error!(SERVICE, "complete_session", session_id = session.id, error = e);
                false
            }
        };

        log_service_success!(
            SERVICE,
            "submit",
            session_id = session.id,
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(SubmissionOutcome {
            session_id: session.id,
            topics: analysis.topics,
            source: analysis.source,
            summary_persisted,
        })
    }

    async fn abandon(&self, session_id: Uuid) {
        if let Err(e) = with_deadline(
            self.persistence_timeout,
            "abandon_session",
            self.store.abandon_session(session_id),
        )
        .await
        {
            log_service_warn!(SERVICE, "abandon_session", format!("could not abandon session {}: {}", session_id, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::llm_providers::OfflineProvider;
    use crate::llm_providers::LLMProvider;
    use crate::llm_service::LLMService;
    use crate::models::{
        AnswerHistoryRecord, DiagnosticSession, EvidenceItem, Exam, QuestionPoolEntry, SessionKind, SessionStatus,
        TopicInfo,
    };
    use crate::rate_limiter::InMemoryRateLimiter;
    use async_trait::async_trait;

    /// Delegates to a real database but can fail selected writes.
    struct FlakyStore {
        inner: Database,
        fail_insert: bool,
        fail_complete: bool,
    }

    #[async_trait]
    impl AssessmentStore for FlakyStore {
        async fn find_exam(&self, exam: ExamType) -> anyhow::Result<Option<Exam>> {
            self.inner.find_exam(exam).await
        }

        async fn create_session(&self, user_id: &str, exam_id: &str, kind: SessionKind) -> anyhow::Result<DiagnosticSession> {
            self.inner.create_session(user_id, exam_id, kind).await
        }

        async fn get_session(&self, session_id: Uuid) -> anyhow::Result<Option<DiagnosticSession>> {
            self.inner.get_session(session_id).await
        }

        async fn insert_answers(&self, session_id: Uuid, user_id: &str, answers: &[AnswerRecord]) -> anyhow::Result<()> {
            if self.fail_insert {
                return Err(anyhow::anyhow!("disk I/O error"));
            }
            self.inner.insert_answers(session_id, user_id, answers).await
        }

        async fn complete_session(&self, session_id: Uuid, summary: &[WeaknessTopic]) -> anyhow::Result<()> {
            if self.fail_complete {
                return Err(anyhow::anyhow!("database is locked"));
            }
            self.inner.complete_session(session_id, summary).await
        }

        async fn complete_practice_session(&self, session_id: Uuid) -> anyhow::Result<()> {
            self.inner.complete_practice_session(session_id).await
        }

        async fn abandon_session(&self, session_id: Uuid) -> anyhow::Result<()> {
            self.inner.abandon_session(session_id).await
        }

        async fn latest_completed_diagnostic(&self, user_id: &str) -> anyhow::Result<Option<DiagnosticSession>> {
            self.inner.latest_completed_diagnostic(user_id).await
        }

        async fn get_topic(&self, topic_id: &str) -> anyhow::Result<Option<TopicInfo>> {
            self.inner.get_topic(topic_id).await
        }

        async fn get_error_evidence(&self, user_id: &str, topic_id: &str) -> anyhow::Result<Vec<EvidenceItem>> {
            self.inner.get_error_evidence(user_id, topic_id).await
        }

        async fn get_question_pool(&self, topic_id: &str) -> anyhow::Result<Vec<QuestionPoolEntry>> {
            self.inner.get_question_pool(topic_id).await
        }

        async fn get_answer_history(&self, user_id: &str, question_ids: &[String]) -> anyhow::Result<Vec<AnswerHistoryRecord>> {
            self.inner.get_answer_history(user_id, question_ids).await
        }
    }

    async fn orchestrator(fail_insert: bool, fail_complete: bool, quota: u32) -> (SubmissionOrchestrator, Database) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.create_exam("UCR").await.unwrap();
        let store = Arc::new(FlakyStore {
            inner: db.clone(),
            fail_insert,
            fail_complete,
        });
        let analyzer = WeaknessAnalyzer::new(LLMService::from_generator(Arc::new(LLMProvider::Offline(OfflineProvider))));
        let limiter = Arc::new(InMemoryRateLimiter::new(quota, Duration::from_secs(3600)));
        (
            SubmissionOrchestrator::new(store, analyzer, limiter, 50, Duration::from_secs(5)),
            db,
        )
    }

    fn answer(topic: &str, correct: bool) -> Answer {
        Answer {
            question_id: format!("q-{}", topic),
            selected_option_id: "opt-1".to_string(),
            is_correct: correct,
            response_time_ms: 1500,
            topic_id: format!("t-{}", topic),
            topic_name: topic.to_string(),
        }
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_input() {
        let (orchestrator, _) = orchestrator(false, false, 10).await;

        assert!(matches!(orchestrator.validate("sat", &[answer("A", true)]), Err(ApiError::Validation(_))));
        assert!(matches!(orchestrator.validate("ucr", &[]), Err(ApiError::Validation(_))));

        let too_many: Vec<Answer> = (0..51).map(|_| answer("A", true)).collect();
        assert!(matches!(orchestrator.validate("ucr", &too_many), Err(ApiError::Validation(_))));

        let mut slow = answer("A", true);
        slow.response_time_ms = 300_000;
        assert!(matches!(orchestrator.validate("ucr", &[slow]), Err(ApiError::Validation(_))));

        assert_eq!(orchestrator.validate(" UCR ", &[answer("A", true)]).unwrap(), ExamType::Ucr);
    }

    #[tokio::test]
    async fn test_successful_submission_completes_session() {
        let (orchestrator, db) = orchestrator(false, false, 10).await;
        let answers = [answer("A", false), answer("A", false), answer("B", true), answer("C", false)];

        let outcome = orchestrator.submit("user-1", "ucr", &answers).await.unwrap();
        assert_eq!(outcome.topics.len(), 3);
        assert_eq!(outcome.source, AnalysisSource::Fallback);
        assert!(outcome.summary_persisted);

        let session = db.get_session(outcome.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.result_summary, Some(outcome.topics));
    }

    #[tokio::test]
    async fn test_unknown_exam_row_is_not_found() {
        let (orchestrator, _) = orchestrator(false, false, 10).await;
        let result = orchestrator.submit("user-1", "tec", &[answer("A", true)]).await;
        assert!(matches!(result, Err(ApiError::ExamNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_answer_insert_abandons_session() {
        let (orchestrator, db) = orchestrator(true, false, 10).await;
        let result = orchestrator.submit("user-1", "ucr", &[answer("A", true)]).await;
        assert!(matches!(result, Err(ApiError::Save(_))));
        assert!(db.latest_completed_diagnostic("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_completion_still_returns_topics() {
        let (orchestrator, db) = orchestrator(false, true, 10).await;
        let outcome = orchestrator.submit("user-1", "ucr", &[answer("A", false)]).await.unwrap();

        assert_eq!(outcome.topics.len(), 3);
        assert!(!outcome.summary_persisted);
        let session = db.get_session(outcome.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::InProgress);
        assert!(session.result_summary.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_applies_before_persistence() {
        let (orchestrator, db) = orchestrator(false, false, 1).await;
        orchestrator.submit("user-1", "ucr", &[answer("A", false)]).await.unwrap();
        let first = db.latest_completed_diagnostic("user-1").await.unwrap().unwrap();

        let result = orchestrator.submit("user-1", "ucr", &[answer("B", false)]).await;
        assert!(matches!(result, Err(ApiError::RateLimited { .. })));
        assert_eq!(db.latest_completed_diagnostic("user-1").await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_invalid_input_does_not_consume_quota() {
        let (orchestrator, _) = orchestrator(false, false, 1).await;
        assert!(orchestrator.submit("user-1", "ucr", &[]).await.is_err());
        assert!(orchestrator.submit("user-1", "ucr", &[answer("A", true)]).await.is_ok());
    }
}
