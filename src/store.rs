use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    AnswerHistoryRecord, AnswerRecord, DiagnosticSession, EvidenceItem, Exam, ExamType, QuestionPoolEntry,
    SessionKind, TopicInfo, WeaknessTopic,
};

/// Relational storage used by the submission, learning and practice flows.
///
/// "Not found" is reported as `Ok(None)` or an empty list. Status transitions
/// only ever move a session out of `in_progress`; implementations must refuse
/// to touch a session that already left that state.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn find_exam(&self, exam: ExamType) -> Result<Option<Exam>>;

    async fn create_session(&self, user_id: &str, exam_id: &str, kind: SessionKind) -> Result<DiagnosticSession>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<DiagnosticSession>>;

    /// Insert all answers for a session atomically.
    async fn insert_answers(&self, session_id: Uuid, user_id: &str, answers: &[AnswerRecord]) -> Result<()>;

    /// `in_progress -> completed` with a non-empty summary attached.
    async fn complete_session(&self, session_id: Uuid, summary: &[WeaknessTopic]) -> Result<()>;

    /// `in_progress -> completed` for practice sessions, which carry no summary.
    async fn complete_practice_session(&self, session_id: Uuid) -> Result<()>;

    /// `in_progress -> abandoned`.
    async fn abandon_session(&self, session_id: Uuid) -> Result<()>;

    async fn latest_completed_diagnostic(&self, user_id: &str) -> Result<Option<DiagnosticSession>>;

    async fn get_topic(&self, topic_id: &str) -> Result<Option<TopicInfo>>;

    /// The learner's wrong answers on a topic, oldest first.
    async fn get_error_evidence(&self, user_id: &str, topic_id: &str) -> Result<Vec<EvidenceItem>>;

    async fn get_question_pool(&self, topic_id: &str) -> Result<Vec<QuestionPoolEntry>>;

    async fn get_answer_history(&self, user_id: &str, question_ids: &[String]) -> Result<Vec<AnswerHistoryRecord>>;
}
