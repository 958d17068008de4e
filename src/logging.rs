//! Standardized logging macros and log sanitization.
//!
//! The macros keep field names consistent across the API, service, database
//! and text-generation layers. Anything derived from a learner (identities,
//! free text coming back from the generator) goes through [`mask_identity`] or
//! [`sanitize_for_log`] before it is attached to an event.

use regex::Regex;
use std::sync::LazyLock;

static BEARER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-._~+/]+=*").expect("bearer regex"));
static KEY_VALUE_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|token|password|secret)(["'\s]*[:=]["'\s]*)[^\s"'&,]+"#)
        .expect("secret regex")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z0-9._%+-]{1,2})[A-Za-z0-9._%+-]*@([A-Za-z0-9.-]+\.[A-Za-z]{2,})\b")
        .expect("email regex")
});

/// Mask sensitive configuration values (URLs, keys) for safe logging
pub fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

/// Partially mask a learner identity so log lines stay correlatable without exposing it.
pub fn mask_identity(identity: &str) -> String {
    let prefix: String = identity.chars().take(4).collect();
    if identity.chars().count() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", prefix)
    }
}

/// Redact bearer tokens, `key=value` secrets and e-mail local parts, and cap the length.
pub fn sanitize_for_log(text: &str) -> String {
    let redacted = BEARER_TOKEN.replace_all(text, "Bearer [REDACTED]");
    let redacted = KEY_VALUE_SECRET.replace_all(&redacted, "$1$2[REDACTED]");
    let redacted = EMAIL.replace_all(&redacted, "$1***@$2");

    const MAX_LOGGED_CHARS: usize = 500;
    if redacted.chars().count() > MAX_LOGGED_CHARS {
        let truncated: String = redacted.chars().take(MAX_LOGGED_CHARS).collect();
        format!("{}...", truncated)
    } else {
        redacted.into_owned()
    }
}

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, user = $user:expr) => {
        tracing::debug!(
            operation = $operation,
            user = %$crate::logging::mask_identity(&$user),
            "API operation started"
        );
    };
    ($operation:expr, topic_id = $topic_id:expr) => {
        tracing::debug!(
            operation = $operation,
            topic_id = %$topic_id,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(operation = $operation, "API operation started");
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, user = $user:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            user = %$crate::logging::mask_identity(&$user),
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(operation = $operation, "API operation completed: {}", $msg);
    };
}

/// Log API operation errors with consistent structure
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$crate::logging::sanitize_for_log(&$error.to_string()),
            "API operation failed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, user = $user:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            user = %$crate::logging::mask_identity(&$user),
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(operation = $operation, "API operation warning: {}", $msg);
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

/// Log service operation start with context
#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, answer_count = $count:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            answer_count = $count,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr, topic_id = $topic_id:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            topic_id = %$topic_id,
            "Service operation started"
        );
    };
}

/// Log service operation success
#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, session_id = $session_id:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            session_id = %$session_id,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation completed: {}", $msg
        );
    };
}

/// Log service operation errors
#[macro_export]
macro_rules! log_service_error {
    ($service:expr, $operation:expr, session_id = $session_id:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            session_id = %$session_id,
            error = %$crate::logging::sanitize_for_log(&$error.to_string()),
            "Service operation failed"
        );
    };
    ($service:expr, $operation:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            error = %$crate::logging::sanitize_for_log(&$error.to_string()),
            "Service operation failed"
        );
    };
}

/// Log service warnings
#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            "Service warning: {}",
            $msg
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

/// Log database operation performance and results
#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "database",
            operation = $operation,
            error = %$error,
            "Database operation failed"
        );
    };
}

// ============================================================================
// Text Generation Logging Macros
// ============================================================================

/// Log text-generation operations with provider context
#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, provider = $provider:expr, item_count = $count:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            item_count = $count,
            "LLM operation started"
        );
    };
    (success, $operation:expr, provider = $provider:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            duration_ms = $duration,
            "LLM operation completed successfully"
        );
    };
    (error, $operation:expr, provider = $provider:expr, error = $error:expr) => {
        tracing::warn!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            error = %$crate::logging::sanitize_for_log(&$error.to_string()),
            "LLM operation failed"
        );
    };
    (warn, $operation:expr, $msg:expr) => {
        tracing::warn!(
            component = "llm_service",
            operation = $operation,
            "LLM operation warning: {}", $msg
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

/// Log system startup and shutdown events
#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (shutdown, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "shutdown",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Performance Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_performance {
    ($operation:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            "Performance metrics"
        );
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

/// Log validation results consistently
#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sqlite:assessment_engine.db"), "sqli***e.db");
        assert_eq!(mask_sensitive_data("sk-1234567890abcdef"), "sk-1***cdef");
    }

    #[test]
    fn test_mask_identity() {
        assert_eq!(mask_identity("abc"), "***");
        assert_eq!(mask_identity("user-1234-5678"), "user***");
    }

    #[test]
    fn test_sanitize_for_log_redacts_secrets() {
        let line = "Authorization: Bearer abc.def-123 and api_key=sk-secret-value for maria@example.com";
        let sanitized = sanitize_for_log(line);

        assert!(sanitized.contains("Bearer [REDACTED]"));
        assert!(sanitized.contains("api_key=[REDACTED]"));
        assert!(sanitized.contains("ma***@example.com"));
        assert!(!sanitized.contains("sk-secret-value"));
        assert!(!sanitized.contains("maria@"));
    }

    #[test]
    fn test_sanitize_for_log_truncates_long_text() {
        let long = "x".repeat(2000);
        let sanitized = sanitize_for_log(&long);
        assert_eq!(sanitized.chars().count(), 503);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_logging_macros_compile() {
        let session_id = Uuid::new_v4();
        let user = "user-0001".to_string();
        let error = anyhow::anyhow!("test error");

        log_api_start!("test_operation", user = user);
        log_api_start!("test_operation", topic_id = "topic-1");
        log_api_start!("test_operation");

        log_api_success!("test_operation", user = user, "operation completed");
        log_api_success!("test_operation", count = 5, "items processed");
        log_api_warn!("test_operation", user = user, "operation warning");
        log_api_error!("test_operation", error = error, "operation failed");

        log_service_start!("submission", "submit", answer_count = 4);
        log_service_success!("submission", "submit", session_id = session_id, duration_ms = 12);
        log_service_error!("submission", "submit", session_id = session_id, error = error);
        log_service_warn!("submission", "submit", "degraded");

        log_db_operation!(debug, "load_pool", count = 3, duration_ms = 10);
        log_db_operation!(info, "migration", "database initialized");

        log_llm_operation!(start, "analyze", provider = "Gemini", item_count = 5);
        log_llm_operation!(success, "analyze", provider = "Gemini", duration_ms = 1500);
        log_llm_operation!(error, "analyze", provider = "Gemini", error = error);

        log_system_event!(startup, component = "server", "server starting");
        log_system_event!(config, "configuration loaded successfully");

        log_performance!("single_operation", duration_ms = 50);
        log_validation!(success, "api_request", "request validated");
        log_validation!(failure, "api_request", error = "bad input");
    }
}
