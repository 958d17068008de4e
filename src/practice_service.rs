use futures_util::future::try_join;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ContentLocale;
use crate::errors::ApiError;
use crate::models::{
    AnswerRecord, PracticeSetResponse, PracticeSubmission, PracticeSummary, SessionKind, MAX_RESPONSE_TIME_MS,
};
use crate::practice_selector::{PracticeSelector, SelectionError};
use crate::retry::with_deadline;
use crate::store::AssessmentStore;
use crate::{log_service_error, log_service_start, log_service_success, log_service_warn};

const SERVICE: &str = "practice_service";

#[derive(Clone)]
pub struct PracticeService {
    store: Arc<dyn AssessmentStore>,
    selector: PracticeSelector,
    max_answers: usize,
    persistence_timeout: Duration,
    locale: ContentLocale,
}

impl PracticeService {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        selector: PracticeSelector,
        max_answers: usize,
        persistence_timeout: Duration,
        locale: ContentLocale,
    ) -> Self {
        Self {
            store,
            selector,
            max_answers,
            persistence_timeout,
            locale,
        }
    }

    pub async fn practice_set(&self, user_id: &str, topic_id: &str) -> Result<PracticeSetResponse, ApiError> {
        log_service_start!(SERVICE, "practice_set", topic_id = topic_id);

        let (topic, pool) = try_join(
            with_deadline(self.persistence_timeout, "get_topic", self.store.get_topic(topic_id)),
            with_deadline(
                self.persistence_timeout,
                "get_question_pool",
                self.store.get_question_pool(topic_id),
            ),
        )
        .await
        .map_err(ApiError::Processing)?;
        if topic.is_none() {
            return Err(ApiError::TopicNotFound(topic_id.to_string()));
        }

        let question_ids: Vec<String> = pool.iter().map(|entry| entry.id.clone()).collect();
        let history = with_deadline(
            self.persistence_timeout,
            "get_answer_history",
            self.store.get_answer_history(user_id, &question_ids),
        )
        .await
        .map_err(ApiError::Processing)?;

        match self.selector.select(&pool, &history) {
            Ok(items) => {
                log_service_success!(SERVICE, "practice_set", format!("{} of {} questions selected", items.len(), pool.len()));
                Ok(PracticeSetResponse {
                    practice_questions: items,
                    message: None,
                })
            }
            Err(SelectionError::EmptyPool) => {
                log_service_warn!(SERVICE, "practice_set", format!("topic {} has no questions", topic_id));
                Ok(PracticeSetResponse {
                    practice_questions: Vec::new(),
                    message: Some(empty_pool_message(self.locale).to_string()),
                })
            }
        }
    }

    fn validate(&self, topic_id: &str, submission: &PracticeSubmission) -> Result<(), ApiError> {
        if submission.answers.is_empty() {
            return Err(ApiError::Validation("At least one answer is required".to_string()));
        }
        if submission.answers.len() > self.max_answers {
            return Err(ApiError::Validation(format!(
                "Too many answers: {} (maximum {})",
                submission.answers.len(),
                self.max_answers
            )));
        }
        if submission.topic_id != topic_id {
            return Err(ApiError::Validation("Topic ID mismatch".to_string()));
        }
        for answer in &submission.answers {
            if answer.question_id.trim().is_empty() || answer.selected_option_id.trim().is_empty() {
                return Err(ApiError::Validation("Invalid answer format".to_string()));
            }
            if answer.response_time_ms >= MAX_RESPONSE_TIME_MS {
                return Err(ApiError::Validation(format!(
                    "responseTimeMs must be below {} (question '{}')",
                    MAX_RESPONSE_TIME_MS, answer.question_id
                )));
            }
        }
        Ok(())
    }

    pub async fn submit_practice(
        &self,
        user_id: &str,
        topic_id: &str,
        submission: &PracticeSubmission,
    ) -> Result<PracticeSummary, ApiError> {
        log_service_start!(SERVICE, "submit_practice", answer_count = submission.answers.len());
        self.validate(topic_id, submission)?;

        let topic = with_deadline(self.persistence_timeout, "get_topic", self.store.get_topic(topic_id))
            .await
            .map_err(ApiError::Processing)?
            .ok_or_else(|| ApiError::TopicNotFound(topic_id.to_string()))?;

        let session = with_deadline(
            self.persistence_timeout,
            "create_session",
            self.store.create_session(user_id, &topic.exam_id, SessionKind::Practice),
        )
        .await
        .map_err(ApiError::Session)?;

        let records: Vec<AnswerRecord> = submission.answers.iter().map(AnswerRecord::from).collect();
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

        if let Err(e) = with_deadline(
            self.persistence_timeout,
            "complete_practice_session",
            self.store.complete_practice_session(session.id),
        )
        .await
        {
            log_service_error!(SERVICE, "complete_practice_session", session_id = session.id, error = e);
        }

        let total = submission.answers.len() as u32;
        let correct = submission.answers.iter().filter(|answer| answer.is_correct).count() as u32;
        log_service_success!(SERVICE, "submit_practice", format!("{}/{} correct", correct, total));

        Ok(PracticeSummary {
            total_questions: total,
            correct_answers: correct,
            score_percentage: score_percentage(correct, total),
            topic_id: topic_id.to_string(),
            session_id: session.id,
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

/// Percentage of correct answers, rounded half up.
pub fn score_percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (correct * 200 + total) / (2 * total)
}

pub fn empty_pool_message(locale: ContentLocale) -> &'static str {
    match locale {
        ContentLocale::Es => "No hay preguntas disponibles para este tema en este momento.",
        ContentLocale::En => "There are no questions available for this topic right now.",
    }
}

pub fn practice_saved_message(locale: ContentLocale) -> &'static str {
    match locale {
        ContentLocale::Es => "Resultados de práctica guardados correctamente.",
        ContentLocale::En => "Practice results saved successfully.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, NewOption};
    use crate::models::PracticeAnswer;

    async fn service_with_topic(questions: usize) -> (PracticeService, Database, String) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let exam = db.create_exam("TEC").await.unwrap();
        let topic = db.create_topic(&exam.id, "Proporciones").await.unwrap();
        for i in 0..questions {
            db.create_question(
                &topic.id,
                &format!("Pregunta {}", i),
                None,
                &[
                    NewOption {
                        text: "sí".to_string(),
                        is_correct: true,
                        rationale: Some("Porque sí".to_string()),
                    },
                    NewOption {
                        text: "no".to_string(),
                        is_correct: false,
                        rationale: None,
                    },
                ],
            )
            .await
            .unwrap();
        }

        let service = PracticeService::new(
            Arc::new(db.clone()),
            PracticeSelector::default(),
            50,
            Duration::from_secs(5),
            ContentLocale::Es,
        );
        (service, db, topic.id)
    }

    fn practice_answer(question_id: &str, correct: bool) -> PracticeAnswer {
        PracticeAnswer {
            question_id: question_id.to_string(),
            selected_option_id: "opt".to_string(),
            is_correct: correct,
            response_time_ms: 2000,
        }
    }

    #[test]
    fn test_score_percentage_rounds_half_up() {
        assert_eq!(score_percentage(2, 3), 67);
        assert_eq!(score_percentage(1, 3), 33);
        assert_eq!(score_percentage(1, 8), 13);
        assert_eq!(score_percentage(5, 5), 100);
        assert_eq!(score_percentage(0, 0), 0);
    }

    #[tokio::test]
    async fn test_empty_pool_returns_message() {
        let (service, _, topic_id) = service_with_topic(0).await;
        let response = service.practice_set("user-1", &topic_id).await.unwrap();
        assert!(response.practice_questions.is_empty());
        assert_eq!(response.message.as_deref(), Some(empty_pool_message(ContentLocale::Es)));
    }

    #[tokio::test]
    async fn test_practice_set_is_bounded() {
        let (service, _, topic_id) = service_with_topic(8).await;
        let response = service.practice_set("user-1", &topic_id).await.unwrap();
        assert_eq!(response.practice_questions.len(), 5);
        assert!(response.message.is_none());
        assert!(response.practice_questions.iter().all(|q| q.rationale == "Porque sí"));
    }

    #[tokio::test]
    async fn test_submission_summary_and_history() {
        let (service, db, topic_id) = service_with_topic(3).await;
        let pool = db.get_question_pool(&topic_id).await.unwrap();
        let submission = PracticeSubmission {
            topic_id: topic_id.clone(),
            answers: vec![
                practice_answer(&pool[0].id, true),
                practice_answer(&pool[1].id, true),
                practice_answer(&pool[2].id, false),
            ],
        };

        let summary = service.submit_practice("user-1", &topic_id, &submission).await.unwrap();
        assert_eq!(summary.total_questions, 3);
        assert_eq!(summary.correct_answers, 2);
        assert_eq!(summary.score_percentage, 67);

        let session = db.get_session(summary.session_id).await.unwrap().unwrap();
        assert_eq!(session.kind, SessionKind::Practice);
        assert_eq!(session.status, crate::models::SessionStatus::Completed);

        let ids: Vec<String> = pool.iter().map(|q| q.id.clone()).collect();
        assert_eq!(db.get_answer_history("user-1", &ids).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_submission_validation() {
        let (service, _, topic_id) = service_with_topic(1).await;

        let mismatch = PracticeSubmission {
            topic_id: "other".to_string(),
            answers: vec![practice_answer("q", true)],
        };
        assert!(matches!(
            service.submit_practice("user-1", &topic_id, &mismatch).await,
            Err(ApiError::Validation(reason)) if reason == "Topic ID mismatch"
        ));

        let empty = PracticeSubmission {
            topic_id: topic_id.clone(),
            answers: vec![],
        };
        assert!(matches!(
            service.submit_practice("user-1", &topic_id, &empty).await,
            Err(ApiError::Validation(_))
        ));

        let unknown = PracticeSubmission {
            topic_id: "missing".to_string(),
            answers: vec![practice_answer("q", true)],
        };
        assert!(matches!(
            service.submit_practice("user-1", "missing", &unknown).await,
            Err(ApiError::TopicNotFound(_))
        ));
    }
}
