//! Error taxonomy and the ordered classification rules.

use super::strategy::{StrategyFactory, StrategyKind};
use super::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where in the pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLevel {
    Input,
    Ai,
    Validation,
}

impl ErrorLevel {
    /// Type used when no rule matches.
    pub fn default_type(&self) -> ErrorType {
        match self {
            ErrorLevel::Input => ErrorType::InputProcessingError,
            ErrorLevel::Ai => ErrorType::UnknownError,
            ErrorLevel::Validation => ErrorType::SchemaValidationError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidFormat,
    MalformedInput,
    MissingData,
    InputProcessingError,
    AiTimeout,
    RateLimit,
    NetworkError,
    InvalidAiResponse,
    UnknownError,
    SchemaValidationError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidFormat => "invalid_format",
            ErrorType::MalformedInput => "malformed_input",
            ErrorType::MissingData => "missing_data",
            ErrorType::InputProcessingError => "input_processing_error",
            ErrorType::AiTimeout => "ai_timeout",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::NetworkError => "network_error",
            ErrorType::InvalidAiResponse => "invalid_ai_response",
            ErrorType::UnknownError => "unknown_error",
            ErrorType::SchemaValidationError => "schema_validation_error",
        }
    }

    /// Strategy kind and confidence attached on classification.
    pub fn default_strategy(&self) -> (StrategyKind, f64) {
        match self {
            ErrorType::RateLimit => (StrategyKind::Retry, 0.9),
            ErrorType::AiTimeout => (StrategyKind::Retry, 0.75),
            ErrorType::NetworkError => (StrategyKind::Retry, 0.7),
            ErrorType::InvalidAiResponse => (StrategyKind::EnhancePrompt, 0.7),
            ErrorType::SchemaValidationError => (StrategyKind::EnhancePrompt, 0.6),
            ErrorType::MalformedInput => (StrategyKind::Fallback, 0.8),
            ErrorType::InvalidFormat => (StrategyKind::Fallback, 0.7),
            ErrorType::MissingData => (StrategyKind::Fallback, 0.6),
            ErrorType::InputProcessingError | ErrorType::UnknownError => (StrategyKind::Fallback, 0.5),
        }
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ErrorType::InvalidFormat => &[
                "Provide a curl command, a raw HTTP request, or a plain description",
                "Separate multiple requests with 'Request N:' markers",
            ],
            ErrorType::MalformedInput => &[
                "Check for unbalanced quotes or braces",
                "Make sure embedded JSON is valid",
            ],
            ErrorType::MissingData => &[
                "Include the target URL and HTTP method",
                "Say how many users and for how long",
            ],
            ErrorType::InputProcessingError => &["Simplify the input and try again"],
            ErrorType::AiTimeout => &[
                "Increase aiProvider.timeoutMs",
                "Shorten the input",
            ],
            ErrorType::RateLimit => &["Wait before retrying", "Reduce the request rate to the AI provider"],
            ErrorType::NetworkError => &["Check connectivity to the AI provider", "Verify the provider base URL"],
            ErrorType::InvalidAiResponse => &["Retry with a more explicit prompt", "Try a more capable model"],
            ErrorType::UnknownError => &["Retry later", "Enable the fallback parser"],
            ErrorType::SchemaValidationError => &[
                "Ensure every request has a method and URL",
                "Specify users or a request rate",
            ],
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule: any pattern found in the lowercase message at
/// the given level yields the type.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub level: ErrorLevel,
    pub patterns: &'static [&'static str],
    pub error_type: ErrorType,
}

const fn rule(level: ErrorLevel, patterns: &'static [&'static str], error_type: ErrorType) -> ClassificationRule {
    ClassificationRule {
        level,
        patterns,
        error_type,
    }
}

/// Rules in evaluation order; first match wins.
pub const CLASSIFICATION_RULES: &[ClassificationRule] = &[
    rule(ErrorLevel::Ai, &["rate limit", "too many requests", "http 429"], ErrorType::RateLimit),
    rule(ErrorLevel::Ai, &["timeout", "timed out"], ErrorType::AiTimeout),
    rule(
        ErrorLevel::Ai,
        &[
            "network",
            "connection",
            "connect",
            "dns",
            "request failed",
            "http 500",
            "http 502",
            "http 503",
            "http 504",
        ],
        ErrorType::NetworkError,
    ),
    rule(
        ErrorLevel::Ai,
        &["invalid json", "unexpected token", "parse", "invalid response", "invalid ai response"],
        ErrorType::InvalidAiResponse,
    ),
    rule(ErrorLevel::Input, &["malformed", "unbalanced", "unterminated"], ErrorType::MalformedInput),
    rule(ErrorLevel::Input, &["missing", "required", "empty"], ErrorType::MissingData),
    rule(ErrorLevel::Input, &["format", "unrecognized", "unsupported"], ErrorType::InvalidFormat),
    rule(ErrorLevel::Validation, &["missing", "required"], ErrorType::SchemaValidationError),
];

/// First matching rule's type, or the level default.
pub fn classify(message: &str, level: ErrorLevel) -> ErrorType {
    let lower = message.to_lowercase();
    CLASSIFICATION_RULES
        .iter()
        .filter(|r| r.level == level)
        .find(|r| r.patterns.iter().any(|p| lower.contains(p)))
        .map(|r| r.error_type)
        .unwrap_or_else(|| level.default_type())
}

/// Build a [`ParseError`] for `message`, attaching the default strategy from
/// `factory`.
pub fn classify_error(
    factory: &StrategyFactory,
    message: &str,
    level: ErrorLevel,
    context: Option<Value>,
) -> ParseError {
    let error_type = classify(message, level);
    let (kind, confidence) = error_type.default_strategy();
    ParseError::new(level, error_type, message, factory.create(kind, confidence)).with_context(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let err = classify_error(&StrategyFactory::default(), "Rate limit exceeded", ErrorLevel::Ai, None);
        assert_eq!(err.error_type, ErrorType::RateLimit);
        assert_eq!(err.recovery_strategy.strategy, StrategyKind::Retry);
        assert!((err.recovery_strategy.confidence - 0.9).abs() < 1e-9);
        assert!(!err.suggestions.is_empty());
    }

    #[test]
    fn test_rules_are_level_scoped() {
        assert_eq!(classify("request timeout", ErrorLevel::Ai), ErrorType::AiTimeout);
        assert_eq!(classify("request timeout", ErrorLevel::Input), ErrorType::InputProcessingError);
        assert_eq!(classify("malformed JSON body", ErrorLevel::Input), ErrorType::MalformedInput);
        assert_eq!(classify("missing url", ErrorLevel::Input), ErrorType::MissingData);
    }

    #[test]
    fn test_first_match_wins() {
        // Matches both rate limit and network patterns.
        assert_eq!(classify("rate limit on connection pool", ErrorLevel::Ai), ErrorType::RateLimit);
    }

    #[test]
    fn test_pipeline_error_messages() {
        let timeout = crate::PipelineError::Timeout { ms: 30_000 }.to_string();
        assert_eq!(classify(&timeout, ErrorLevel::Ai), ErrorType::AiTimeout);
        let overloaded = crate::PipelineError::HttpError {
            status: 503,
            body: "overloaded".into(),
            retry_after: None,
        }
        .to_string();
        assert_eq!(classify(&overloaded, ErrorLevel::Ai), ErrorType::NetworkError);
    }

    #[test]
    fn test_level_defaults() {
        assert_eq!(classify("???", ErrorLevel::Ai), ErrorType::UnknownError);
        assert_eq!(classify("???", ErrorLevel::Validation), ErrorType::SchemaValidationError);
        let (kind, conf) = ErrorType::UnknownError.default_strategy();
        assert_eq!(kind, StrategyKind::Fallback);
        assert!(conf > 0.0);
    }

    #[test]
    fn test_every_type_has_suggestions() {
        for t in [
            ErrorType::InvalidFormat,
            ErrorType::MalformedInput,
            ErrorType::MissingData,
            ErrorType::InputProcessingError,
            ErrorType::AiTimeout,
            ErrorType::RateLimit,
            ErrorType::NetworkError,
            ErrorType::InvalidAiResponse,
            ErrorType::UnknownError,
            ErrorType::SchemaValidationError,
        ] {
            assert!(!t.suggestions().is_empty(), "{}", t);
        }
    }
}
