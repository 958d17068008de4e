use std::sync::Arc;
use std::time::Duration;

use crate::config::ContentLocale;
use crate::content_cache::{ContentCache, EvidenceMatch};
use crate::errors::ApiError;
use crate::evidence_hasher::EvidenceHasher;
use crate::llm_providers::GenerationOutcome;
use crate::llm_service::{LLMService, ModuleDossier};
use crate::models::{CacheKey, EvidenceItem, Explanation, LearningModule, Machote, TopicInfo};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::retry::with_deadline;
use crate::store::AssessmentStore;
use crate::{log_service_start, log_service_success, log_service_warn};

const SERVICE: &str = "learning_service";

/// What a learner sees when opening a topic.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicContent {
    Module {
        module: LearningModule,
        /// Served from the cache without generating.
        cached: bool,
        /// Produced by the generator rather than the built-in template.
        generated: bool,
    },
    NoErrors {
        topic_name: String,
        message: String,
    },
}

#[derive(Clone)]
pub struct LearningService {
    store: Arc<dyn AssessmentStore>,
    cache: ContentCache,
    llm_service: LLMService,
    generation_limiter: Arc<dyn RateLimiter>,
    persistence_timeout: Duration,
    locale: ContentLocale,
}

impl LearningService {
    pub fn new(
        store: Arc<dyn AssessmentStore>,
        cache: ContentCache,
        llm_service: LLMService,
        generation_limiter: Arc<dyn RateLimiter>,
        persistence_timeout: Duration,
    ) -> Self {
        let locale = llm_service.locale();
        Self {
            store,
            cache: cache.with_timeout(persistence_timeout),
            llm_service,
            generation_limiter,
            persistence_timeout,
            locale,
        }
    }

    pub async fn topic_content(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        topic_id: &str,
    ) -> Result<TopicContent, ApiError> {
        log_service_start!(SERVICE, "topic_content", topic_id = topic_id);

        let topic = with_deadline(self.persistence_timeout, "get_topic", self.store.get_topic(topic_id))
            .await
            .map_err(ApiError::Processing)?
            .ok_or_else(|| ApiError::TopicNotFound(topic_id.to_string()))?;

        let evidence = with_deadline(
            self.persistence_timeout,
            "get_error_evidence",
            self.store.get_error_evidence(user_id, topic_id),
        )
        .await
        .map_err(ApiError::Processing)?;

        if evidence.is_empty() {
            return Ok(TopicContent::NoErrors {
                message: no_errors_message(&topic.name, self.locale),
                topic_name: topic.name,
            });
        }

        let evidence_hash = EvidenceHasher::hash_evidence(&evidence);
        let key = CacheKey::new(user_id, topic_id);

        if let Some(hit) = self.cache.get(&key, &EvidenceMatch(&evidence_hash)).await {
            log_service_success!(SERVICE, "topic_content", format!("cache hit, access #{}", hit.access_count));
            return Ok(TopicContent::Module {
                module: hit.content,
                cached: true,
                generated: true,
            });
        }

        if let RateLimitDecision::Limited { retry_after_secs } = self.generation_limiter.check(user_id).await {
            return Err(ApiError::RateLimited { retry_after_secs });
        }

        let dossier = ModuleDossier {
            student_name: display_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(default_student_name(self.locale))
                .to_string(),
            exam_name: topic.exam_name.clone(),
            topic_name: topic.name.clone(),
            evidence,
        };

        let module = match self.llm_service.generate_learning_module(&dossier).await {
            Ok(GenerationOutcome::Parsed(module)) => module,
            Ok(GenerationOutcome::Malformed { reason, .. }) => {
                log_service_warn!(SERVICE, "topic_content", format!("malformed module, serving template: {}", reason));
                return Ok(self.templated(&topic, &dossier.evidence));
            }
            Err(e) => {
                log_service_warn!(SERVICE, "topic_content", format!("generation failed, serving template: {}", e));
                return Ok(self.templated(&topic, &dossier.evidence));
            }
        };

        let evidence_count = u32::try_from(dossier.evidence.len()).unwrap_or(u32::MAX);
        if let Err(e) = self.cache.put(&key, &module, &evidence_hash, evidence_count).await {
            log_service_warn!(SERVICE, "topic_content", format!("could not cache module: {}", e));
        }

        log_service_success!(SERVICE, "topic_content", "generated new module");
        Ok(TopicContent::Module {
            module,
            cached: false,
            generated: true,
        })
    }

    fn templated(&self, topic: &TopicInfo, evidence: &[EvidenceItem]) -> TopicContent {
        TopicContent::Module {
            module: template_module(&topic.name, evidence, self.locale),
            cached: false,
            generated: false,
        }
    }
}

pub fn no_errors_message(topic_name: &str, locale: ContentLocale) -> String {
    match locale {
        ContentLocale::Es => format!(
            "¡Excelente! No tienes errores registrados en \"{}\". Tu dominio de este tema es sólido.",
            topic_name
        ),
        ContentLocale::En => format!(
            "Excellent! You have no recorded errors on \"{}\". Your command of this topic is solid.",
            topic_name
        ),
    }
}

fn default_student_name(locale: ContentLocale) -> &'static str {
    match locale {
        ContentLocale::Es => "Estudiante",
        ContentLocale::En => "Student",
    }
}

/// Module assembled without the generator. Never cached.
pub fn template_module(topic_name: &str, evidence: &[EvidenceItem], locale: ContentLocale) -> LearningModule {
    let mut mistakes: Vec<String> = Vec::new();
    for item in evidence {
        if mistakes.len() == 3 {
            break;
        }
        if !mistakes.contains(&item.error_rationale) {
            mistakes.push(item.error_rationale.clone());
        }
    }
    let main_mistake = mistakes.first().cloned().unwrap_or_default();

    match locale {
        ContentLocale::Es => LearningModule {
            title: topic_name.to_string(),
            explanation: Explanation {
                validation: format!(
                    "Es normal que \"{}\" cueste al inicio; tus respuestas muestran exactamente dónde enfocarte.",
                    topic_name
                ),
                analogy: "Piensa en este tema como una receta: cuando entiendes por qué va cada paso, ya no necesitas memorizarla.".to_string(),
                core_concept: format!(
                    "Repasa con calma las preguntas que fallaste. El error que más se repitió fue: {}",
                    main_mistake
                ),
            },
            machote: Machote {
                title: format!("El Machote para {}", topic_name),
                steps: vec![
                    "Paso 1: Lee la pregunta completa e identifica exactamente qué te piden.".to_string(),
                    "Paso 2: Descarta las opciones que contradicen los datos del enunciado.".to_string(),
                    "Paso 3: Verifica tu respuesta con los datos antes de continuar.".to_string(),
                ],
                common_mistakes: mistakes,
            },
        },
        ContentLocale::En => LearningModule {
            title: topic_name.to_string(),
            explanation: Explanation {
                validation: format!(
                    "It is normal for \"{}\" to feel hard at first; your answers show exactly where to focus.",
                    topic_name
                ),
                analogy: "Think of this topic as a recipe: once you understand why each step is there, you no longer need to memorize it.".to_string(),
                core_concept: format!(
                    "Calmly review the questions you missed. Your most repeated mistake was: {}",
                    main_mistake
                ),
            },
            machote: Machote {
                title: format!("The template for {}", topic_name),
                steps: vec![
                    "Step 1: Read the whole question and identify exactly what it asks.".to_string(),
                    "Step 2: Discard the options that contradict the given data.".to_string(),
                    "Step 3: Check your answer against the data before moving on.".to_string(),
                ],
                common_mistakes: mistakes,
            },
        },
    }
}
