use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ContentLocale;
use crate::llm_providers::{
    GenerationError, GenerationOutcome, JsonResponseParser, LLMProviderFactory, LLMProviderType, TextGenerator,
};
use crate::models::{Answer, EvidenceItem, ExamType, LearningModule};
use crate::{log_llm_operation, log_performance};

const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(20);

/// A topic as proposed by the generator, before shape validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTopic {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Per-answer evidence sent for weakness analysis. Question text is never included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnswerEvidence<'a> {
    topic_name: &'a str,
    is_correct: bool,
}

/// Everything the module generator is told about one learner and topic.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDossier {
    pub student_name: String,
    pub exam_name: String,
    pub topic_name: String,
    pub evidence: Vec<EvidenceItem>,
}

#[derive(Clone)]
pub struct LLMService {
    generator: Arc<dyn TextGenerator>,
    json_parser: JsonResponseParser,
    timeout: Duration,
    locale: ContentLocale,
}

impl LLMService {
    pub fn new_with_provider(
        api_key: String,
        base_url: Option<String>,
        provider_type: LLMProviderType,
        model: Option<String>,
    ) -> Self {
        let provider = LLMProviderFactory::create_provider(provider_type, api_key, base_url, model);
        Self::from_generator(Arc::new(provider))
    }

    pub fn from_generator(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            json_parser: JsonResponseParser,
            timeout: DEFAULT_GENERATION_TIMEOUT,
            locale: ContentLocale::Es,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_locale(mut self, locale: ContentLocale) -> Self {
        self.locale = locale;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.generator.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub fn locale(&self) -> ContentLocale {
        self.locale
    }

    /// One generator round-trip under the configured timeout.
    async fn request(&self, operation: &'static str, system_message: &str, prompt: &str) -> Result<String, GenerationError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.generator.generate(Some(system_message), prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(text) => {
                log_llm_operation!(success, operation, provider = self.provider_name(), duration_ms = elapsed_ms);
                debug!(
                    operation = operation,
                    response_length = text.len(),
                    response_preview = %crate::logging::sanitize_for_log(&text.chars().take(200).collect::<String>()),
                    "Raw generator response"
                );
            }
            Err(e) => {
                log_llm_operation!(error, operation, provider = self.provider_name(), error = e);
            }
        }
        log_performance!(operation, duration_ms = elapsed_ms);

        result
    }

    /// Ask the generator for the three topics most in need of improvement
    /// (or three strengths on a perfect score). Shape validation is left to the caller.
    pub async fn analyze_weaknesses(
        &self,
        exam: ExamType,
        answers: &[Answer],
    ) -> Result<GenerationOutcome<Vec<CandidateTopic>>, GenerationError> {
        log_llm_operation!(start, "analyze_weaknesses", provider = self.provider_name(), item_count = answers.len());

        let evidence: Vec<AnswerEvidence<'_>> = answers
            .iter()
            .map(|answer| AnswerEvidence {
                topic_name: answer.topic_name.as_str(),
                is_correct: answer.is_correct,
            })
            .collect();
        let evidence_json = serde_json::to_string_pretty(&evidence)
            .map_err(|e| GenerationError::Unavailable(format!("could not serialize evidence: {}", e)))?;

        let prompt = format!(
            r#"CONTEXT: A student has just completed a diagnostic test for the {exam} admission exam.
Analyze their performance PATTERN and identify the 3 topics most in need of improvement.

INPUT_DATA (one entry per answer):
{evidence}

TASK:
1. Rank topics first by the highest proportion of incorrect answers; break ties by preferring the more foundational skill.
2. If every answer is correct, do NOT return an empty list. Return instead the 3 topics tied to the hardest questions the student answered correctly, framed as strengths.
3. Return ONLY a JSON array of exactly three objects. Each object has a "title" (the topic name) and a "description" (one encouraging sentence explaining why the area matters, or why it is a strength).
4. Write every description in {language}.

EXAMPLE OUTPUT:
[
  {{ "title": "Topic name", "description": "One encouraging sentence." }},
  {{ "title": "Topic name", "description": "One encouraging sentence." }},
  {{ "title": "Topic name", "description": "One encouraging sentence." }}
]"#,
            exam = exam.as_str().to_uppercase(),
            evidence = evidence_json,
            language = self.locale.language_name(),
        );

        let system_message = "You are an expert psychometrician and academic advisor for university admission tests. Always respond with valid JSON in the requested format.";
        let response_text = self.request("analyze_weaknesses", system_message, &prompt).await?;

        Ok(self.json_parser.parse_outcome::<Vec<CandidateTopic>>(&response_text))
    }

    /// Generate a personalized learning module that addresses the learner's specific errors.
    pub async fn generate_learning_module(
        &self,
        dossier: &ModuleDossier,
    ) -> Result<GenerationOutcome<LearningModule>, GenerationError> {
        log_llm_operation!(start, "generate_learning_module", provider = self.provider_name(), item_count = dossier.evidence.len());

        let evidence_json = serde_json::to_string_pretty(&dossier.evidence)
            .map_err(|e| GenerationError::Unavailable(format!("could not serialize evidence: {}", e)))?;

        let prompt = format!(
            r#"CONTEXT: You received a cognitive dossier for a student struggling with one topic. Use the evidence to write a short, hyper-personalized study module.

COGNITIVE DOSSIER:
- Student name: {student}
- Exam: "{exam}"
- Topic: "{topic}"
- Evidence of misunderstanding (JSON): {evidence}

TASK: Return ONLY a single JSON object with EXACTLY this structure:
{{
  "title": "Topic title",
  "explanation": {{
    "validation": "A sentence that validates the difficulty and connects with the student",
    "analogy": "A simple, relatable analogy that explains the concept",
    "core_concept": "A clear explanation of the core concept"
  }},
  "machote": {{
    "title": "The template for [topic]",
    "steps": ["Step 1: ...", "Step 2: ...", "Step 3: ..."],
    "common_mistakes": ["The most common mistake students make"]
  }}
}}

INSTRUCTIONS:
1. The explanation and the template MUST directly address the error_rationale entries in the evidence. Start by fixing the student's specific misunderstanding.
2. Write everything in natural, encouraging {language}.
3. Use simple language and do not add or remove fields."#,
            student = dossier.student_name,
            exam = dossier.exam_name,
            topic = dossier.topic_name,
            evidence = evidence_json,
            language = self.locale.language_name(),
        );

        let system_message = "You are an expert academic coach: a helpful, smart, slightly older friend. Your tone is natural, direct and encouraging. Always respond with valid JSON in the requested format.";
        let response_text = self.request("generate_learning_module", system_message, &prompt).await?;

        Ok(match self.json_parser.parse_outcome::<LearningModule>(&response_text) {
            GenerationOutcome::Parsed(mut module) => {
                if module.title.trim().is_empty() {
                    module.title = dossier.topic_name.clone();
                }
                match incomplete_module_reason(&module) {
                    Some(reason) => GenerationOutcome::malformed(response_text, reason),
                    None => GenerationOutcome::Parsed(module),
                }
            }
            malformed => malformed,
        })
    }
}

fn incomplete_module_reason(module: &LearningModule) -> Option<String> {
    let explanation = &module.explanation;
    if [&explanation.validation, &explanation.analogy, &explanation.core_concept]
        .iter()
        .any(|field| field.trim().is_empty())
    {
        return Some("explanation has empty fields".to_string());
    }
    if module.machote.steps.iter().all(|step| step.trim().is_empty()) {
        return Some("machote has no steps".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Recording {
        async fn generate(&self, _system: Option<&str>, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.response.clone())
        }

        fn provider_name(&self) -> &'static str {
            "Recording"
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    struct Stalled;

    #[async_trait]
    impl TextGenerator for Stalled {
        async fn generate(&self, _system: Option<&str>, _prompt: &str) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }

        fn provider_name(&self) -> &'static str {
            "Stalled"
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    fn answer(topic: &str, correct: bool) -> Answer {
        Answer {
            question_id: format!("q-{}", topic),
            selected_option_id: "opt-1".to_string(),
            is_correct: correct,
            response_time_ms: 1200,
            topic_id: format!("t-{}", topic),
            topic_name: topic.to_string(),
        }
    }

    #[tokio::test]
    async fn test_analysis_prompt_never_contains_question_ids() {
        let generator = Arc::new(Recording {
            response: "[]".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let service = LLMService::from_generator(generator.clone());

        let outcome = service
            .analyze_weaknesses(ExamType::Ucr, &[answer("Secuencias", false)])
            .await
            .unwrap();
        assert_eq!(outcome, GenerationOutcome::Parsed(vec![]));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("\"topicName\": \"Secuencias\""));
        assert!(!prompts[0].contains("q-Secuencias"));
        assert!(prompts[0].contains("Spanish"));
    }

    #[tokio::test]
    async fn test_generation_timeout_is_reported() {
        let service = LLMService::from_generator(Arc::new(Stalled)).with_timeout(Duration::from_millis(20));
        let result = service.analyze_weaknesses(ExamType::Tec, &[answer("Lógica", true)]).await;
        assert!(matches!(result, Err(GenerationError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_incomplete_module_is_malformed() {
        let response = r#"{"title": "", "explanation": {"validation": "ok", "analogy": "", "core_concept": "c"},
            "machote": {"title": "m", "steps": ["1"], "common_mistakes": []}}"#;
        let generator = Arc::new(Recording {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let service = LLMService::from_generator(generator);
        let dossier = ModuleDossier {
            student_name: "Estudiante".to_string(),
            exam_name: "UCR".to_string(),
            topic_name: "Analogías".to_string(),
            evidence: vec![],
        };

        let outcome = service.generate_learning_module(&dossier).await.unwrap();
        assert!(!outcome.is_parsed());
    }
}
