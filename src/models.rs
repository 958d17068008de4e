use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Upper bound (exclusive) on a recorded answer's response time.
pub const MAX_RESPONSE_TIME_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Ucr,
    Tec,
}

impl ExamType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ucr" => Some(ExamType::Ucr),
            "tec" => Some(ExamType::Tec),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExamType::Ucr => "ucr",
            ExamType::Tec => "tec",
        }
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single answer produced by the client during a quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    pub selected_option_id: String,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub topic_id: String,
    #[serde(default)]
    pub topic_name: String,
}

impl Answer {
    /// Returns a description of the first violated invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        if self.question_id.trim().is_empty() {
            return Some("questionId must not be empty".to_string());
        }
        if self.selected_option_id.trim().is_empty() {
            return Some(format!(
                "selectedOptionId must not be empty (question '{}')",
                self.question_id
            ));
        }
        if self.topic_id.trim().is_empty() {
            return Some(format!(
                "topicId must not be empty (question '{}')",
                self.question_id
            ));
        }
        if self.response_time_ms >= MAX_RESPONSE_TIME_MS {
            return Some(format!(
                "responseTimeMs must be below {} (question '{}', got {})",
                MAX_RESPONSE_TIME_MS, self.question_id, self.response_time_ms
            ));
        }
        None
    }
}

/// The persisted shape of an answer; shared by diagnostic and practice submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,
    pub selected_option_id: String,
    pub is_correct: bool,
    pub response_time_ms: u64,
}

impl From<&Answer> for AnswerRecord {
    fn from(answer: &Answer) -> Self {
        Self {
            question_id: answer.question_id.clone(),
            selected_option_id: answer.selected_option_id.clone(),
            is_correct: answer.is_correct,
            response_time_ms: answer.response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Diagnostic,
    Practice,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Diagnostic => "diagnostic",
            SessionKind::Practice => "practice",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "diagnostic" => Some(SessionKind::Diagnostic),
            "practice" => Some(SessionKind::Practice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSession {
    pub id: Uuid,
    pub user_id: String,
    pub exam_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub result_summary: Option<Vec<WeaknessTopic>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaknessTopic {
    pub title: String,
    pub description: String,
}

impl WeaknessTopic {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub id: String,
    pub exam_id: String,
    pub name: String,
    pub exam_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPoolEntry {
    pub id: String,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub topic_id: String,
    #[serde(default)]
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerHistoryRecord {
    pub user_id: String,
    pub question_id: String,
    pub is_correct: bool,
}

/// One wrong answer on a topic, as fed to module generation and the evidence hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub question_text: String,
    pub question_difficulty: String,
    pub chosen_distractor_text: String,
    pub error_rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningModule {
    #[serde(default)]
    pub title: String,
    pub explanation: Explanation,
    pub machote: Machote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub validation: String,
    pub analogy: String,
    pub core_concept: String,
}

/// Step-by-step solving template for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machote {
    pub title: String,
    pub steps: Vec<String>,
    pub common_mistakes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub user_id: String,
    pub topic_id: String,
}

impl CacheKey {
    pub fn new(user_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topic_id: topic_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedModule {
    pub user_id: String,
    pub topic_id: String,
    pub content: LearningModule,
    pub evidence_hash: String,
    pub evidence_count: u32,
    pub access_count: u32,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CachedModule {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.user_id.clone(), self.topic_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub identity: String,
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeItem {
    pub id: String,
    pub text: String,
    pub options: Vec<PracticeOption>,
    pub correct_option_id: String,
    pub rationale: String,
}

// Request / response bodies

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRequest {
    pub exam_type: String,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResponse {
    pub weakness_topics: Vec<WeaknessTopic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestDiagnosticResponse {
    pub session_id: Uuid,
    pub exam_id: String,
    pub weakness_topics: Vec<WeaknessTopic>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeAnswer {
    pub question_id: String,
    pub selected_option_id: String,
    pub is_correct: bool,
    #[serde(default)]
    pub response_time_ms: u64,
}

impl From<&PracticeAnswer> for AnswerRecord {
    fn from(answer: &PracticeAnswer) -> Self {
        Self {
            question_id: answer.question_id.clone(),
            selected_option_id: answer.selected_option_id.clone(),
            is_correct: answer.is_correct,
            response_time_ms: answer.response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSubmission {
    pub topic_id: String,
    pub answers: Vec<PracticeAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSummary {
    pub total_questions: u32,
    pub correct_answers: u32,
    pub score_percentage: u32,
    pub topic_id: String,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSetResponse {
    pub practice_questions: Vec<PracticeItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeResultResponse {
    pub message: String,
    pub summary: PracticeSummary,
}
