use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

use crate::content_cache::ModuleStore;
use crate::log_db_operation;
use crate::models::*;
use crate::store::AssessmentStore;

const UNKNOWN_QUESTION: &str = "Unknown question";
const UNKNOWN_DIFFICULTY: &str = "unknown";
const UNKNOWN_OPTION: &str = "Unknown option";
const NO_RATIONALE: &str = "No rationale available";

/// Stored form of `questions.content`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QuestionContent {
    #[serde(default)]
    text: Option<String>,
}

/// An answer option supplied when seeding the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOption {
    pub text: String,
    pub is_correct: bool,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = if database_url.contains(":memory:") {
            // Every connection to :memory: is a separate database, so keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(database_url)
                .await?
        } else {
            let options = SqliteConnectOptions::from_str(database_url)?
                .create_if_missing(true)
                .foreign_keys(true);
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "schema ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exams (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                exam_id TEXT NOT NULL,
                name TEXT NOT NULL,
                FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id TEXT PRIMARY KEY,
                topic_id TEXT NOT NULL,
                content TEXT NOT NULL,
                difficulty TEXT,
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS question_options (
                id TEXT PRIMARY KEY,
                question_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                is_correct INTEGER NOT NULL DEFAULT 0,
                rationale TEXT,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS diagnostic_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                exam_id TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'diagnostic',
                status TEXT NOT NULL DEFAULT 'in_progress',
                result_summary TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Question and option ids come from the client and are not checked against the catalog.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_answers (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                selected_option_id TEXT NOT NULL,
                is_correct INTEGER NOT NULL,
                response_time_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES diagnostic_sessions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS learning_modules (
                user_id TEXT NOT NULL,
                topic_id TEXT NOT NULL,
                content TEXT NOT NULL,
                evidence_hash TEXT NOT NULL,
                evidence_count INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 1,
                last_accessed_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, topic_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_answers_user_question ON user_answers(user_id, question_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Catalog operations

    pub async fn create_exam(&self, name: &str) -> Result<Exam> {
        let exam = Exam {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };

        sqlx::query("INSERT INTO exams (id, name) VALUES (?1, ?2)")
            .bind(&exam.id)
            .bind(&exam.name)
            .execute(&self.pool)
            .await?;

        Ok(exam)
    }

    pub async fn create_topic(&self, exam_id: &str, name: &str) -> Result<TopicInfo> {
        let exam_name: String = sqlx::query("SELECT name FROM exams WHERE id = ?1")
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("name"))
            .ok_or_else(|| anyhow!("exam {} does not exist", exam_id))?;

        let topic = TopicInfo {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.to_string(),
            name: name.to_string(),
            exam_name,
        };

        sqlx::query("INSERT INTO topics (id, exam_id, name) VALUES (?1, ?2, ?3)")
            .bind(&topic.id)
            .bind(&topic.exam_id)
            .bind(&topic.name)
            .execute(&self.pool)
            .await?;

        Ok(topic)
    }

    pub async fn create_question(
        &self,
        topic_id: &str,
        text: &str,
        difficulty: Option<&str>,
        options: &[NewOption],
    ) -> Result<QuestionPoolEntry> {
        let question_id = Uuid::new_v4().to_string();
        let content = serde_json::to_string(&QuestionContent {
            text: Some(text.to_string()),
        })?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO questions (id, topic_id, content, difficulty) VALUES (?1, ?2, ?3, ?4)")
            .bind(&question_id)
            .bind(topic_id)
            .bind(&content)
            .bind(difficulty)
            .execute(&mut *tx)
            .await?;

        let mut stored_options = Vec::with_capacity(options.len());
        for (position, option) in options.iter().enumerate() {
            let option_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO question_options (id, question_id, position, text, is_correct, rationale) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&option_id)
            .bind(&question_id)
            .bind(position as i64)
            .bind(&option.text)
            .bind(option.is_correct)
            .bind(&option.rationale)
            .execute(&mut *tx)
            .await?;

            stored_options.push(QuestionOption {
                id: option_id,
                text: option.text.clone(),
                is_correct: option.is_correct,
                rationale: option.rationale.clone(),
            });
        }

        tx.commit().await?;

        Ok(QuestionPoolEntry {
            id: question_id,
            text: text.to_string(),
            options: stored_options,
            topic_id: topic_id.to_string(),
            difficulty: difficulty.map(str::to_string),
        })
    }

    fn row_to_session(row: &SqliteRow) -> Result<DiagnosticSession> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        let summary = row
            .get::<Option<String>, _>("result_summary")
            .map(|raw| serde_json::from_str::<Vec<WeaknessTopic>>(&raw))
            .transpose()?;

        Ok(DiagnosticSession {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            user_id: row.get("user_id"),
            exam_id: row.get("exam_id"),
            kind: SessionKind::parse(&kind).ok_or_else(|| anyhow!("unknown session kind '{}'", kind))?,
            status: SessionStatus::parse(&status).ok_or_else(|| anyhow!("unknown session status '{}'", status))?,
            result_summary: summary,
            completed_at: row
                .get::<Option<String>, _>("completed_at")
                .map(|raw| parse_timestamp(&raw))
                .transpose()?,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_cached_module(row: &SqliteRow) -> Result<CachedModule> {
        Ok(CachedModule {
            user_id: row.get("user_id"),
            topic_id: row.get("topic_id"),
            content: serde_json::from_str(&row.get::<String, _>("content"))?,
            evidence_hash: row.get("evidence_hash"),
            evidence_count: u32::try_from(row.get::<i64, _>("evidence_count"))?,
            access_count: u32::try_from(row.get::<i64, _>("access_count"))?,
            last_accessed_at: parse_timestamp(&row.get::<String, _>("last_accessed_at"))?,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        })
    }

    /// Move a session out of `in_progress`; fails if it is no longer there.
    async fn finish_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        summary: Option<String>,
    ) -> Result<()> {
        let completed_at = (status == SessionStatus::Completed).then(|| timestamp(Utc::now()));
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_sessions
            SET status = ?1, result_summary = ?2, completed_at = ?3
            WHERE id = ?4 AND status = 'in_progress'
            "#,
        )
        .bind(status.as_str())
        .bind(summary)
        .bind(completed_at)
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(anyhow!(
                "session {} is not in progress, cannot mark it {}",
                session_id,
                status.as_str()
            ));
        }
        Ok(())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[async_trait]
impl AssessmentStore for Database {
    async fn find_exam(&self, exam: ExamType) -> Result<Option<Exam>> {
        let pattern = format!("%{}%", exam.as_str());
        let row = sqlx::query("SELECT id, name FROM exams WHERE lower(name) LIKE ?1 ORDER BY name LIMIT 1")
            .bind(pattern)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Exam {
            id: row.get("id"),
            name: row.get("name"),
        }))
    }

    async fn create_session(&self, user_id: &str, exam_id: &str, kind: SessionKind) -> Result<DiagnosticSession> {
        let session = DiagnosticSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            exam_id: exam_id.to_string(),
            kind,
            status: SessionStatus::InProgress,
            result_summary: None,
            completed_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO diagnostic_sessions (id, user_id, exam_id, kind, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.user_id)
        .bind(&session.exam_id)
        .bind(session.kind.as_str())
        .bind(session.status.as_str())
        .bind(timestamp(session.created_at))
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<DiagnosticSession>> {
        let row = sqlx::query("SELECT * FROM diagnostic_sessions WHERE id = ?1")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn insert_answers(&self, session_id: Uuid, user_id: &str, answers: &[AnswerRecord]) -> Result<()> {
        let started = Instant::now();
        let created_at = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        for answer in answers {
            sqlx::query(
                r#"
                INSERT INTO user_answers (id, user_id, session_id, question_id, selected_option_id,
                                          is_correct, response_time_ms, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(session_id.to_string())
            .bind(&answer.question_id)
            .bind(&answer.selected_option_id)
            .bind(answer.is_correct)
            .bind(answer.response_time_ms as i64)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log_db_operation!(
            debug,
            "insert_answers",
            count = answers.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(())
    }

    async fn complete_session(&self, session_id: Uuid, summary: &[WeaknessTopic]) -> Result<()> {
        if summary.is_empty() {
            return Err(anyhow!("refusing to complete session {} without a result summary", session_id));
        }
        let summary_json = serde_json::to_string(summary)?;
        self.finish_session(session_id, SessionStatus::Completed, Some(summary_json)).await
    }

    async fn complete_practice_session(&self, session_id: Uuid) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed, None).await
    }

    async fn abandon_session(&self, session_id: Uuid) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Abandoned, None).await
    }

    async fn latest_completed_diagnostic(&self, user_id: &str) -> Result<Option<DiagnosticSession>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM diagnostic_sessions
            WHERE user_id = ?1 AND kind = 'diagnostic' AND status = 'completed'
              AND result_summary IS NOT NULL
            ORDER BY completed_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn get_topic(&self, topic_id: &str) -> Result<Option<TopicInfo>> {
        let row = sqlx::query(
            r#"
            SELECT t.id, t.exam_id, t.name, e.name AS exam_name
            FROM topics t
            JOIN exams e ON e.id = t.exam_id
            WHERE t.id = ?1
            "#,
        )
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TopicInfo {
            id: row.get("id"),
            exam_id: row.get("exam_id"),
            name: row.get("name"),
            exam_name: row.get("exam_name"),
        }))
    }

    async fn get_error_evidence(&self, user_id: &str, topic_id: &str) -> Result<Vec<EvidenceItem>> {
        let started = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT q.content, q.difficulty, o.text AS option_text, o.rationale
            FROM user_answers ua
            JOIN questions q ON q.id = ua.question_id
            LEFT JOIN question_options o ON o.id = ua.selected_option_id
            WHERE ua.user_id = ?1 AND q.topic_id = ?2 AND ua.is_correct = 0
            ORDER BY ua.created_at ASC, ua.rowid ASC
            "#,
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        let evidence: Vec<EvidenceItem> = rows
            .iter()
            .map(|row| {
                let content: QuestionContent =
                    serde_json::from_str(&row.get::<String, _>("content")).unwrap_or_default();
                EvidenceItem {
                    question_text: non_empty_or(content.text, UNKNOWN_QUESTION),
                    question_difficulty: non_empty_or(row.get("difficulty"), UNKNOWN_DIFFICULTY),
                    chosen_distractor_text: non_empty_or(row.get("option_text"), UNKNOWN_OPTION),
                    error_rationale: non_empty_or(row.get("rationale"), NO_RATIONALE),
                }
            })
            .collect();

        log_db_operation!(
            debug,
            "get_error_evidence",
            count = evidence.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(evidence)
    }

    async fn get_question_pool(&self, topic_id: &str) -> Result<Vec<QuestionPoolEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT q.id AS question_id, q.content, q.difficulty,
                   o.id AS option_id, o.text AS option_text, o.is_correct, o.rationale
            FROM questions q
            LEFT JOIN question_options o ON o.question_id = q.id
            WHERE q.topic_id = ?1
            ORDER BY q.rowid ASC, o.position ASC
            "#,
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await?;

        let mut pool: Vec<QuestionPoolEntry> = Vec::new();
        for row in rows {
            let question_id: String = row.get("question_id");
            if pool.last().map(|entry| entry.id != question_id).unwrap_or(true) {
                let content: QuestionContent =
                    serde_json::from_str(&row.get::<String, _>("content")).unwrap_or_default();
                pool.push(QuestionPoolEntry {
                    id: question_id,
                    text: content.text.unwrap_or_default(),
                    options: Vec::new(),
                    topic_id: topic_id.to_string(),
                    difficulty: row.get("difficulty"),
                });
            }

            if let (Some(entry), Some(option_id)) = (pool.last_mut(), row.get::<Option<String>, _>("option_id")) {
                entry.options.push(QuestionOption {
                    id: option_id,
                    text: row.get::<Option<String>, _>("option_text").unwrap_or_default(),
                    is_correct: row.get::<Option<bool>, _>("is_correct").unwrap_or(false),
                    rationale: row.get("rationale"),
                });
            }
        }

        Ok(pool)
    }

    async fn get_answer_history(&self, user_id: &str, question_ids: &[String]) -> Result<Vec<AnswerHistoryRecord>> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..question_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT DISTINCT question_id, is_correct FROM user_answers WHERE user_id = ?1 AND question_id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        for question_id in question_ids {
            query = query.bind(question_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| AnswerHistoryRecord {
                user_id: user_id.to_string(),
                question_id: row.get("question_id"),
                is_correct: row.get("is_correct"),
            })
            .collect())
    }
}

#[async_trait]
impl ModuleStore for Database {
    async fn load_module(&self, key: &CacheKey) -> Result<Option<CachedModule>> {
        let row = sqlx::query("SELECT * FROM learning_modules WHERE user_id = ?1 AND topic_id = ?2")
            .bind(&key.user_id)
            .bind(&key.topic_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_cached_module).transpose()
    }

    async fn upsert_module(&self, record: &CachedModule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO learning_modules (user_id, topic_id, content, evidence_hash, evidence_count,
                                          access_count, last_accessed_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id, topic_id) DO UPDATE SET
                content = excluded.content,
                evidence_hash = excluded.evidence_hash,
                evidence_count = excluded.evidence_count,
                access_count = excluded.access_count,
                last_accessed_at = excluded.last_accessed_at
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.topic_id)
        .bind(serde_json::to_string(&record.content)?)
        .bind(&record.evidence_hash)
        .bind(i64::from(record.evidence_count))
        .bind(i64::from(record.access_count))
        .bind(timestamp(record.last_accessed_at))
        .bind(timestamp(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_module_access(&self, key: &CacheKey, at: DateTime<Utc>) -> Result<Option<CachedModule>> {
        let result = sqlx::query(
            r#"
            UPDATE learning_modules
            SET access_count = access_count + 1, last_accessed_at = ?1
            WHERE user_id = ?2 AND topic_id = ?3
            "#,
        )
        .bind(timestamp(at))
        .bind(&key.user_id)
        .bind(&key.topic_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load_module(key).await
    }
}
