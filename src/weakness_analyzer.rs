use std::cmp::Ordering;
use std::time::Instant;

use crate::config::ContentLocale;
use crate::llm_providers::GenerationOutcome;
use crate::llm_service::{CandidateTopic, LLMService};
use crate::models::{Answer, ExamType, WeaknessTopic};
use crate::{log_service_start, log_service_success, log_service_warn};

/// Every analysis yields exactly this many topics.
pub const TOPIC_COUNT: usize = 3;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("cannot analyze an empty answer set")]
    EmptyInput,
}

/// Which path produced the topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSource {
    Generated,
    Fallback,
    Emergency,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub topics: Vec<WeaknessTopic>,
    pub source: AnalysisSource,
}

/// Correctness totals for one topic, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAggregate {
    pub name: String,
    pub correct_count: u32,
    pub total_count: u32,
    first_seen: usize,
}

impl TopicAggregate {
    pub fn incorrect_count(&self) -> u32 {
        self.total_count - self.correct_count
    }

    pub fn is_perfect(&self) -> bool {
        self.correct_count == self.total_count
    }

    /// Worst first: lower correctness ratio, then more misses, then earlier appearance.
    fn weakness_order(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.correct_count) * u64::from(other.total_count);
        let rhs = u64::from(other.correct_count) * u64::from(self.total_count);
        lhs.cmp(&rhs)
            .then_with(|| other.incorrect_count().cmp(&self.incorrect_count()))
            .then_with(|| self.first_seen.cmp(&other.first_seen))
    }
}

/// Group answers by topic name. Answers without a topic name are ignored.
pub fn aggregate(answers: &[Answer]) -> Vec<TopicAggregate> {
    let mut aggregates: Vec<TopicAggregate> = Vec::new();

    for answer in answers {
        let name = answer.topic_name.trim();
        if name.is_empty() {
            continue;
        }

        let position = match aggregates.iter().position(|aggregate| aggregate.name == name) {
            Some(position) => position,
            None => {
                aggregates.push(TopicAggregate {
                    name: name.to_string(),
                    correct_count: 0,
                    total_count: 0,
                    first_seen: aggregates.len(),
                });
                aggregates.len() - 1
            }
        };

        let aggregate = &mut aggregates[position];
        aggregate.total_count += 1;
        if answer.is_correct {
            aggregate.correct_count += 1;
        }
    }

    aggregates
}

/// Turns a scored answer batch into three ranked topics.
///
/// The generator is tried first. Anything other than a well-formed list of
/// three non-empty topics (including timeouts and transport errors) drops to
/// the deterministic ranking, and when no topic names are present at all the
/// fixed emergency topics are returned. Only an empty batch is an error.
#[derive(Clone)]
pub struct WeaknessAnalyzer {
    llm_service: LLMService,
    locale: ContentLocale,
}

impl WeaknessAnalyzer {
    pub fn new(llm_service: LLMService) -> Self {
        let locale = llm_service.locale();
        Self { llm_service, locale }
    }

    pub async fn analyze(&self, exam: ExamType, answers: &[Answer]) -> Result<Analysis, AnalysisError> {
        if answers.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let started = Instant::now();
        log_service_start!("weakness_analyzer", "analyze", answer_count = answers.len());

        let aggregates = aggregate(answers);
        if aggregates.is_empty() {
            log_service_warn!("weakness_analyzer", "analyze", "no topic names on any answer, using emergency topics");
            return Ok(emergency_analysis(self.locale));
        }

        let analysis = match self.llm_service.analyze_weaknesses(exam, answers).await {
            Ok(GenerationOutcome::Parsed(candidates)) => match validate_candidates(candidates) {
                Ok(topics) => Analysis {
                    topics,
                    source: AnalysisSource::Generated,
                },
                Err(reason) => {
                    log_service_warn!("weakness_analyzer", "analyze", format!("generator output rejected: {}", reason));
                    deterministic_analysis(&aggregates, self.locale)
                }
            },
            Ok(GenerationOutcome::Malformed { reason, .. }) => {
                log_service_warn!("weakness_analyzer", "analyze", format!("malformed generator output: {}", reason));
                deterministic_analysis(&aggregates, self.locale)
            }
            Err(e) => {
                log_service_warn!("weakness_analyzer", "analyze", format!("generator unavailable: {}", e));
                deterministic_analysis(&aggregates, self.locale)
            }
        };

        log_service_success!(
            "weakness_analyzer",
            "analyze",
            format!("{:?} analysis in {}ms", analysis.source, started.elapsed().as_millis())
        );
        Ok(analysis)
    }
}

/// Accept the generator's topics only when there are exactly three with non-blank fields.
pub fn validate_candidates(candidates: Vec<CandidateTopic>) -> Result<Vec<WeaknessTopic>, String> {
    if candidates.len() != TOPIC_COUNT {
        return Err(format!("expected {} topics, got {}", TOPIC_COUNT, candidates.len()));
    }

    candidates
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| {
            let title = candidate.title.as_deref().map(str::trim).unwrap_or_default();
            let description = candidate.description.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() || description.is_empty() {
                Err(format!("topic {} has an empty title or description", index))
            } else {
                Ok(WeaknessTopic::new(title, description))
            }
        })
        .collect()
}

/// Rank topics by correctness ratio and describe them from templates.
pub fn deterministic_analysis(aggregates: &[TopicAggregate], locale: ContentLocale) -> Analysis {
    if aggregates.is_empty() {
        return emergency_analysis(locale);
    }

    let all_correct = aggregates.iter().all(TopicAggregate::is_perfect);
    let mut ranked: Vec<&TopicAggregate> = aggregates.iter().collect();
    ranked.sort_by(|a, b| a.weakness_order(b));

    let mut topics: Vec<WeaknessTopic> = ranked
        .into_iter()
        .take(TOPIC_COUNT)
        .map(|aggregate| templates::describe(aggregate, all_correct, locale))
        .collect();

    let generics = templates::generic_topics(locale).into_iter().map(|generic| {
        if all_correct {
            templates::as_strength(generic, locale)
        } else {
            generic
        }
    });
    for generic in generics {
        if topics.len() == TOPIC_COUNT {
            break;
        }
        if !topics.iter().any(|topic| topic.title == generic.title) {
            topics.push(generic);
        }
    }

    Analysis {
        topics,
        source: AnalysisSource::Fallback,
    }
}

pub fn emergency_analysis(locale: ContentLocale) -> Analysis {
    Analysis {
        topics: templates::generic_topics(locale).into_iter().take(TOPIC_COUNT).collect(),
        source: AnalysisSource::Emergency,
    }
}

mod templates {
    use super::TopicAggregate;
    use crate::config::ContentLocale;
    use crate::models::WeaknessTopic;

    pub(super) fn describe(aggregate: &TopicAggregate, all_correct: bool, locale: ContentLocale) -> WeaknessTopic {
        let (correct, total) = (aggregate.correct_count, aggregate.total_count);
        match (locale, all_correct, aggregate.is_perfect()) {
            (ContentLocale::Es, true, _) => WeaknessTopic::new(
                format!("{} (Zona de Fortaleza)", aggregate.name),
                format!(
                    "¡Excelente! Respondiste correctamente las {} preguntas de este tema. Es una de tus fortalezas, ¡sigue así!",
                    total
                ),
            ),
            (ContentLocale::En, true, _) => WeaknessTopic::new(
                format!("{} (Strength Zone)", aggregate.name),
                format!(
                    "Excellent! You answered all {} questions on this topic correctly. It is one of your strengths, keep it up!",
                    total
                ),
            ),
            (ContentLocale::Es, false, false) => WeaknessTopic::new(
                aggregate.name.clone(),
                format!(
                    "Acertaste {} de {} preguntas de este tema. Reforzarlo te dará una base más sólida para el examen.",
                    correct, total
                ),
            ),
            (ContentLocale::En, false, false) => WeaknessTopic::new(
                aggregate.name.clone(),
                format!(
                    "You got {} of {} questions right on this topic. Reinforcing it will give you a stronger base for the exam.",
                    correct, total
                ),
            ),
            (ContentLocale::Es, false, true) => WeaknessTopic::new(
                aggregate.name.clone(),
                format!(
                    "Acertaste {} de {} preguntas de este tema. Un repaso breve te ayudará a mantener el nivel.",
                    correct, total
                ),
            ),
            (ContentLocale::En, false, true) => WeaknessTopic::new(
                aggregate.name.clone(),
                format!(
                    "You got {} of {} questions right on this topic. A short review will help you keep that level.",
                    correct, total
                ),
            ),
        }
    }

    /// Reframe a generic padding topic for a learner with no misses.
    pub(super) fn as_strength(generic: WeaknessTopic, locale: ContentLocale) -> WeaknessTopic {
        match locale {
            ContentLocale::Es => WeaknessTopic::new(
                format!("{} (Zona de Fortaleza)", generic.title),
                "No fallaste ninguna pregunta. Mantener este tema fresco te ayudará a conservar tu ventaja en el examen.",
            ),
            ContentLocale::En => WeaknessTopic::new(
                format!("{} (Strength Zone)", generic.title),
                "You did not miss a single question. Keeping this topic fresh will help you hold your edge on the exam.",
            ),
        }
    }

    pub(super) fn generic_topics(locale: ContentLocale) -> Vec<WeaknessTopic> {
        match locale {
            ContentLocale::Es => vec![
                WeaknessTopic::new(
                    "Razonamiento Lógico",
                    "Practicar la lógica te ayuda a resolver con más seguridad las preguntas de varios pasos.",
                ),
                WeaknessTopic::new(
                    "Razonamiento Matemático",
                    "Las secuencias y proporciones aparecen en todo el examen; dominarlas suma muchos puntos.",
                ),
                WeaknessTopic::new(
                    "Comprensión Verbal",
                    "Leer con atención y reconocer analogías mejora tu desempeño en toda la prueba.",
                ),
            ],
            ContentLocale::En => vec![
                WeaknessTopic::new(
                    "Logical Reasoning",
                    "Practicing logic helps you solve multi-step questions with more confidence.",
                ),
                WeaknessTopic::new(
                    "Mathematical Reasoning",
                    "Sequences and proportions appear throughout the exam; mastering them adds many points.",
                ),
                WeaknessTopic::new(
                    "Verbal Comprehension",
                    "Careful reading and spotting analogies improves your performance across the whole test.",
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_providers::{GenerationError, TextGenerator};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Scripted(Result<String, ()>);

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, _system: Option<&str>, _prompt: &str) -> Result<String, GenerationError> {
            self.0
                .clone()
                .map_err(|_| GenerationError::Unavailable("scripted failure".to_string()))
        }

        fn provider_name(&self) -> &'static str {
            "Scripted"
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn analyzer(response: Result<&str, ()>) -> WeaknessAnalyzer {
        let generator = Scripted(response.map(str::to_string));
        WeaknessAnalyzer::new(LLMService::from_generator(Arc::new(generator)))
    }

    fn answer(topic: &str, correct: bool) -> Answer {
        Answer {
            question_id: format!("q-{}-{}", topic, correct),
            selected_option_id: "opt".to_string(),
            is_correct: correct,
            response_time_ms: 900,
            topic_id: format!("t-{}", topic),
            topic_name: topic.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let result = analyzer(Err(())).analyze(ExamType::Ucr, &[]).await;
        assert_eq!(result, Err(AnalysisError::EmptyInput));
    }

    #[tokio::test]
    async fn test_valid_generator_output_is_used() {
        let response = r#"```json
[{"title": "Secuencias", "description": "Base de todo."},
 {"title": "Analogías", "description": "Clave verbal."},
 {"title": "Lógica", "description": "Fundamental."}]
```"#;
        let analysis = analyzer(Ok(response))
            .analyze(ExamType::Ucr, &[answer("Secuencias", false)])
            .await
            .unwrap();

        assert_eq!(analysis.source, AnalysisSource::Generated);
        assert_eq!(analysis.topics[1], WeaknessTopic::new("Analogías", "Clave verbal."));
    }

    #[tokio::test]
    async fn test_wrong_length_or_blank_fields_fall_back() {
        let answers = [answer("A", false), answer("B", true)];

        let two_topics = r#"[{"title": "A", "description": "x"}, {"title": "B", "description": "y"}]"#;
        let analysis = analyzer(Ok(two_topics)).analyze(ExamType::Tec, &answers).await.unwrap();
        assert_eq!(analysis.source, AnalysisSource::Fallback);

        let blank = r#"[{"title": "A", "description": " "}, {"title": "B", "description": "y"}, {"title": "C", "description": "z"}]"#;
        let analysis = analyzer(Ok(blank)).analyze(ExamType::Tec, &answers).await.unwrap();
        assert_eq!(analysis.source, AnalysisSource::Fallback);

        let analysis = analyzer(Ok("I cannot help with that")).analyze(ExamType::Tec, &answers).await.unwrap();
        assert_eq!(analysis.source, AnalysisSource::Fallback);
        assert_eq!(analysis.topics.len(), TOPIC_COUNT);
    }

    #[tokio::test]
    async fn test_fallback_ranks_by_correctness_ratio() {
        let answers = [
            answer("A", true),
            answer("A", false),
            answer("B", true),
            answer("C", false),
            answer("D", true),
            answer("D", true),
            answer("D", false),
        ];
        let analysis = analyzer(Err(())).analyze(ExamType::Ucr, &answers).await.unwrap();

        let titles: Vec<&str> = analysis.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "D"]);
        assert_eq!(analysis.source, AnalysisSource::Fallback);
    }

    #[tokio::test]
    async fn test_scenario_with_failed_generation() {
        let answers = [
            answer("topicA", false),
            answer("topicA", false),
            answer("topicB", true),
            answer("topicC", false),
        ];
        let analysis = analyzer(Err(())).analyze(ExamType::Ucr, &answers).await.unwrap();

        let titles: Vec<&str> = analysis.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["topicA", "topicC", "topicB"]);
    }

    #[tokio::test]
    async fn test_perfect_score_returns_strengths() {
        let answers = [answer("A", true), answer("B", true)];
        let analysis = analyzer(Err(())).analyze(ExamType::Ucr, &answers).await.unwrap();

        let titles: Vec<&str> = analysis.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["A (Zona de Fortaleza)", "B (Zona de Fortaleza)", "Razonamiento Lógico (Zona de Fortaleza)"]
        );
        assert!(analysis.topics[2].description.starts_with("No fallaste ninguna pregunta"));
        assert!(analysis.topics.iter().all(|t| !t.description.is_empty()));
    }

    #[test]
    fn test_perfect_single_topic_pads_with_distinct_strengths() {
        let aggregates = aggregate(&[answer("Razonamiento Lógico", true)]);

        let analysis = deterministic_analysis(&aggregates, ContentLocale::En);
        let titles: Vec<&str> = analysis.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Razonamiento Lógico (Strength Zone)",
                "Logical Reasoning (Strength Zone)",
                "Mathematical Reasoning (Strength Zone)",
            ]
        );

        let aggregates = aggregate(&[answer("Razonamiento Lógico", true)]);
        let analysis = deterministic_analysis(&aggregates, ContentLocale::Es);
        let titles: Vec<&str> = analysis.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Razonamiento Lógico (Zona de Fortaleza)",
                "Razonamiento Matemático (Zona de Fortaleza)",
                "Comprensión Verbal (Zona de Fortaleza)",
            ]
        );
    }

    #[tokio::test]
    async fn test_single_topic_is_padded_without_duplicates() {
        let answers = [answer("Razonamiento Lógico", false)];
        let analysis = analyzer(Err(())).analyze(ExamType::Ucr, &answers).await.unwrap();

        let titles: Vec<&str> = analysis.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Razonamiento Lógico", "Razonamiento Matemático", "Comprensión Verbal"]);
    }

    #[tokio::test]
    async fn test_missing_topic_names_use_emergency_topics() {
        let mut nameless = answer("", false);
        nameless.topic_id = "t-1".to_string();
        let analysis = analyzer(Err(())).analyze(ExamType::Ucr, &[nameless]).await.unwrap();

        assert_eq!(analysis.source, AnalysisSource::Emergency);
        assert_eq!(analysis.topics.len(), TOPIC_COUNT);
    }

    #[test]
    fn test_english_templates() {
        let aggregates = aggregate(&[answer("Ratios", false)]);
        let analysis = deterministic_analysis(&aggregates, ContentLocale::En);
        assert!(analysis.topics[0].description.starts_with("You got 0 of 1"));
        assert_eq!(analysis.topics[1].title, "Logical Reasoning");
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let answers = [answer("X", false), answer("Y", false), answer("Z", true), answer("W", false)];
        let aggregates = aggregate(&answers);
        let first = deterministic_analysis(&aggregates, ContentLocale::Es);
        let second = deterministic_analysis(&aggregates, ContentLocale::Es);
        assert_eq!(first, second);
        let titles: Vec<&str> = first.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["X", "Y", "W"]);
    }
}
