use assessment_engine::{
    models::{AnswerRecord, SessionKind, SessionStatus, WeaknessTopic},
    AssessmentStore, Database,
};
use uuid::Uuid;

fn record(question_id: &str) -> AnswerRecord {
    AnswerRecord {
        question_id: question_id.to_string(),
        selected_option_id: "opt".to_string(),
        is_correct: false,
        response_time_ms: 1000,
    }
}

fn summary() -> Vec<WeaknessTopic> {
    vec![
        WeaknessTopic::new("A", "uno"),
        WeaknessTopic::new("B", "dos"),
        WeaknessTopic::new("C", "tres"),
    ]
}

#[tokio::test]
async fn test_database_connection_failure() {
    let result = Database::new("invalid://url").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_answers_require_an_existing_session() {
    let db = Database::new("sqlite::memory:").await.unwrap();

    let result = db.insert_answers(Uuid::new_v4(), "user-1", &[record("q-1")]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_failed_batch_leaves_no_partial_answers() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let exam = db.create_exam("UCR").await.unwrap();
    let session = db.create_session("user-1", &exam.id, SessionKind::Diagnostic).await.unwrap();

    db.insert_answers(session.id, "user-1", &[record("q-1")]).await.unwrap();
    let bad_batch = db
        .insert_answers(Uuid::new_v4(), "user-1", &[record("q-2"), record("q-3")])
        .await;
    assert!(bad_batch.is_err());

    let history = db
        .get_answer_history("user-1", &["q-1".to_string(), "q-2".to_string(), "q-3".to_string()])
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].question_id, "q-1");
}

#[tokio::test]
async fn test_sessions_leave_in_progress_once() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let exam = db.create_exam("TEC").await.unwrap();

    let completed = db.create_session("user-1", &exam.id, SessionKind::Diagnostic).await.unwrap();
    assert_eq!(completed.status, SessionStatus::InProgress);
    assert!(db.complete_session(completed.id, &[]).await.is_err());
    db.complete_session(completed.id, &summary()).await.unwrap();
    assert!(db.complete_session(completed.id, &summary()).await.is_err());
    assert!(db.abandon_session(completed.id).await.is_err());

    let abandoned = db.create_session("user-1", &exam.id, SessionKind::Diagnostic).await.unwrap();
    db.abandon_session(abandoned.id).await.unwrap();
    assert!(db.complete_session(abandoned.id, &summary()).await.is_err());

    let stored = db.get_session(abandoned.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Abandoned);
    assert!(stored.result_summary.is_none());
    assert!(stored.completed_at.is_none());

    let latest = db.latest_completed_diagnostic("user-1").await.unwrap().unwrap();
    assert_eq!(latest.id, completed.id);
}

#[tokio::test]
async fn test_unknown_lookups_are_empty_not_errors() {
    let db = Database::new("sqlite::memory:").await.unwrap();

    assert!(db.get_topic("missing").await.unwrap().is_none());
    assert!(db.get_session(Uuid::new_v4()).await.unwrap().is_none());
    assert!(db.get_question_pool("missing").await.unwrap().is_empty());
    assert!(db.get_error_evidence("user-1", "missing").await.unwrap().is_empty());
    assert!(db.latest_completed_diagnostic("user-1").await.unwrap().is_none());
    assert!(db.get_answer_history("user-1", &[]).await.unwrap().is_empty());
}
