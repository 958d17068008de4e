pub mod api;
pub mod client;
pub mod config;
pub mod content_cache;
pub mod database;
pub mod errors;
pub mod evidence_hasher;
pub mod learning_service;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod practice_selector;
pub mod practice_service;
pub mod rate_limiter;
pub mod retry;
pub mod store;
pub mod weakness_analyzer;

pub use content_cache::{ContentCache, EvidenceMatch, InMemoryModuleStore, ModuleStore, Validity};
pub use database::Database;
pub use errors::*;
pub use evidence_hasher::EvidenceHasher;
pub use llm_providers::{
    GenerationError, GenerationOutcome, JsonResponseParser, LLMProvider, LLMProviderFactory, LLMProviderType,
    TextGenerator,
};
pub use llm_service::LLMService;
pub use models::*;
pub use orchestrator::SubmissionOrchestrator;
pub use practice_selector::PracticeSelector;
pub use rate_limiter::{InMemoryRateLimiter, RateLimitDecision, RateLimiter};
pub use store::AssessmentStore;
pub use weakness_analyzer::WeaknessAnalyzer;
