use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Failures at the text-generation boundary. These never reach API clients;
/// callers route them to a deterministic fallback.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{provider} API request failed with status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("empty response from {0}")]
    EmptyResponse(&'static str),

    #[error("text generation unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

/// Result of parsing free text returned by the generator.
///
/// The generator is an untyped external contract, so a response that fails to
/// parse or validate is kept as data rather than raised as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome<T> {
    Parsed(T),
    Malformed { raw: String, reason: String },
}

impl<T> GenerationOutcome<T> {
    pub fn malformed(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        GenerationOutcome::Malformed {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, GenerationOutcome::Parsed(_))
    }
}

/// Anything that turns an instruction into free text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system_message: Option<&str>, prompt: &str) -> Result<String, GenerationError>;

    fn provider_name(&self) -> &'static str;

    fn model_name(&self) -> &str;
}

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
    Offline(OfflineProvider),
}

#[async_trait]
impl TextGenerator for LLMProvider {
    async fn generate(&self, system_message: Option<&str>, prompt: &str) -> Result<String, GenerationError> {
        match self {
            LLMProvider::OpenAI(provider) => provider.make_request(system_message, prompt).await,
            LLMProvider::Gemini(provider) => provider.make_request(system_message, prompt).await,
            LLMProvider::Offline(provider) => provider.make_request(system_message, prompt).await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(_) => "OpenAI",
            LLMProvider::Gemini(_) => "Gemini",
            LLMProvider::Offline(_) => "Offline",
        }
    }

    fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => &provider.model,
            LLMProvider::Gemini(provider) => &provider.model,
            LLMProvider::Offline(_) => "none",
        }
    }
}

/// OpenAI-compatible chat completions provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<LLMMessage>,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChoice {
    message: LLMMessage,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
        }
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String, GenerationError> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            messages.push(LLMMessage {
                role: "system".to_string(),
                content: sys_msg.to_string(),
            });
        }

        messages.push(LLMMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.4,
        };

        info!(
            provider = "OpenAI",
            model = %self.model,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = "OpenAI",
                status = %status,
                error = %crate::logging::sanitize_for_log(&error_text),
                "LLM API request failed"
            );
            return Err(GenerationError::Status {
                provider: "OpenAI",
                status: status.as_u16(),
                body: error_text,
            });
        }

        let openai_response: OpenAIResponse = response.json().await?;

        let response_content = openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyResponse("OpenAI"))?;

        info!(
            provider = "OpenAI",
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }
}

/// Gemini generateContent provider
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-1.5-flash".to_string()),
        }
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String, GenerationError> {
        let full_prompt = match system_message {
            Some(sys_msg) => format!("{}\n\n{}", sys_msg, prompt),
            None => prompt.to_string(),
        };

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.4,
                top_k: 40,
                top_p: 0.9,
                max_output_tokens: 2048,
            },
        };

        info!(
            provider = "Gemini",
            model = %self.model,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = "Gemini",
                status = %status,
                error = %crate::logging::sanitize_for_log(&error_text),
                "LLM API request failed"
            );
            return Err(GenerationError::Status {
                provider: "Gemini",
                status: status.as_u16(),
                body: error_text,
            });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let response_content = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or(GenerationError::EmptyResponse("Gemini"))?;

        info!(
            provider = "Gemini",
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }
}

/// Provider used when no generation backend is configured; every request fails
/// so callers take their deterministic path.
#[derive(Debug, Clone, Default)]
pub struct OfflineProvider;

impl OfflineProvider {
    pub async fn make_request(&self, _system_message: Option<&str>, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("no text-generation provider configured".to_string()))
    }
}

/// Centralized JSON response parser with robust extraction logic
#[derive(Clone, Default)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    /// Extract JSON from LLM responses that might be wrapped in markdown or other formatting
    pub fn extract_json_from_response(content: &str) -> String {
        let unfenced = Self::strip_code_fences(content);
        let text = unfenced.trim();

        // Whichever container opens first decides the shape.
        let object_start = text.find('{');
        let array_start = text.find('[');
        let (start, closer) = match (object_start, array_start) {
            (Some(o), Some(a)) if a < o => (a, ']'),
            (Some(o), _) => (o, '}'),
            (None, Some(a)) => (a, ']'),
            (None, None) => return text.to_string(),
        };

        match text.rfind(closer) {
            Some(end) if end > start => text[start..=end].to_string(),
            _ => text.to_string(),
        }
    }

    fn strip_code_fences(content: &str) -> String {
        if let Some(start) = content.find("```") {
            let after_fence = &content[start + 3..];
            // Skip an optional language tag on the fence line.
            let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
            let body = &after_fence[body_start..];
            if let Some(end) = body.find("```") {
                return body[..end].to_string();
            }
            return body.to_string();
        }
        content.to_string()
    }

    /// Parse a response into `T`, keeping the raw text when it does not fit.
    pub fn parse_outcome<T>(&self, content: &str) -> GenerationOutcome<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let json_content = Self::extract_json_from_response(content);
        match serde_json::from_str::<T>(&json_content) {
            Ok(parsed) => GenerationOutcome::Parsed(parsed),
            Err(e) => GenerationOutcome::malformed(content, format!("invalid JSON: {}", e)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
    Offline,
}

impl LLMProviderType {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "gemini" | "google" => LLMProviderType::Gemini,
            "openai" | "chatgpt" | "gpt" => LLMProviderType::OpenAI,
            "none" | "offline" | "disabled" => LLMProviderType::Offline,
            other => {
                info!("Unknown LLM provider '{}', defaulting to Gemini", other);
                LLMProviderType::Gemini
            }
        }
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create_provider(
        provider_type: LLMProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
    ) -> LLMProvider {
        match provider_type {
            LLMProviderType::OpenAI => LLMProvider::OpenAI(OpenAIProvider::new(api_key, base_url, model)),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(api_key, base_url, model)),
            LLMProviderType::Offline => LLMProvider::Offline(OfflineProvider),
        }
    }
}
