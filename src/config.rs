use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::llm_providers::LLMProviderType;
use crate::logging::mask_sensitive_data;

use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Text-generation service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub provider: LLMProviderType,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Tunables for analysis, caching, practice selection and the resilience layer
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub submissions_per_window: u32,
    pub learn_generations_per_window: u32,
    pub rate_limit_window_secs: u64,
    pub max_answers_per_submission: usize,
    pub generation_timeout_secs: u64,
    pub persistence_timeout_secs: u64,
    pub practice_limit: usize,
    pub content_locale: ContentLocale,
    pub dev_mode: bool,
}

/// Language used for generated and templated learner-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ContentLocale {
    Es,
    En,
}

impl ContentLocale {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "en" | "en-us" | "english" => ContentLocale::En,
            _ => ContentLocale::Es,
        }
    }

    pub fn language_name(&self) -> &'static str {
        match self {
            ContentLocale::Es => "Spanish",
            ContentLocale::En => "English",
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submissions_per_window: 10,
            learn_generations_per_window: 30,
            rate_limit_window_secs: 3600,
            max_answers_per_submission: 50,
            generation_timeout_secs: 20,
            persistence_timeout_secs: 10,
            practice_limit: 5,
            content_locale: ContentLocale::Es,
            dev_mode: false,
        }
    }
}

impl EngineConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_secs(self.persistence_timeout_secs)
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            llm: LLMConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            engine: EngineConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            llm_provider = ?self.llm.provider,
            llm_model = ?self.llm.model,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            submissions_per_window = self.engine.submissions_per_window,
            rate_limit_window_secs = self.engine.rate_limit_window_secs,
            content_locale = ?self.engine.content_locale,
            dev_mode = self.engine.dev_mode,
            "Configuration summary"
        );
    }

    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.engine.submissions_per_window == 0 {
            return Err(anyhow!("SUBMISSIONS_PER_HOUR must be greater than 0"));
        }

        if self.engine.rate_limit_window_secs == 0 {
            return Err(anyhow!("RATE_LIMIT_WINDOW_SECS must be greater than 0"));
        }

        if self.engine.max_answers_per_submission == 0 {
            return Err(anyhow!("MAX_ANSWERS_PER_SUBMISSION must be greater than 0"));
        }

        if self.engine.practice_limit == 0 {
            return Err(anyhow!("PRACTICE_LIMIT must be greater than 0"));
        }

        if self.llm.provider != LLMProviderType::Offline
            && (self.llm.api_key.is_empty() || self.llm.api_key == "your-api-key")
        {
            warn!("LLM API key appears to be placeholder or empty - analysis will use the deterministic fallback");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unrecognized log level '{}', the env filter may reject it", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:assessment_engine.db?mode=rwc".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl LLMConfig {
    fn from_env() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY")
            .unwrap_or_else(|_| "your-api-key".to_string());

        let base_url = env::var("LLM_BASE_URL").ok();

        let provider_str = env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "gemini".to_string());
        let provider = LLMProviderType::parse(&provider_str);

        let model = env::var("LLM_MODEL").ok();

        Ok(LLMConfig {
            api_key,
            base_url,
            provider,
            model,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string());

        let port = port_str.parse::<u16>()
            .map_err(|_| anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str))?;

        let host = env::var("HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info,assessment_engine=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY")
            .unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl EngineConfig {
    fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();

        Ok(EngineConfig {
            submissions_per_window: parse_env("SUBMISSIONS_PER_HOUR", defaults.submissions_per_window)?,
            learn_generations_per_window: parse_env(
                "LEARN_GENERATIONS_PER_HOUR",
                defaults.learn_generations_per_window,
            )?,
            rate_limit_window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs)?,
            max_answers_per_submission: parse_env(
                "MAX_ANSWERS_PER_SUBMISSION",
                defaults.max_answers_per_submission,
            )?,
            generation_timeout_secs: parse_env("GENERATION_TIMEOUT_SECS", defaults.generation_timeout_secs)?,
            persistence_timeout_secs: parse_env("PERSISTENCE_TIMEOUT_SECS", defaults.persistence_timeout_secs)?,
            practice_limit: parse_env("PRACTICE_LIMIT", defaults.practice_limit)?,
            content_locale: env::var("CONTENT_LOCALE")
                .map(|value| ContentLocale::parse(&value))
                .unwrap_or(defaults.content_locale),
            dev_mode: env::var("APP_ENV")
                .map(|value| value.eq_ignore_ascii_case("development"))
                .unwrap_or(false),
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}
