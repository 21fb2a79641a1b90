//! Recovery strategies and the factory that creates them.

use crate::backend::BackoffConfig;
use crate::config::ParserConfig;
use crate::types::clamp_confidence;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Confidence multiplier applied per prior retry attempt.
pub const RETRY_DECAY: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Retry,
    Fallback,
    EnhancePrompt,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Retry => "retry",
            StrategyKind::Fallback => "fallback",
            StrategyKind::EnhancePrompt => "enhance_prompt",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named way out of a failure, with the confidence it is expected to
/// work. Only [`StrategyFactory`] creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStrategy {
    pub can_recover: bool,
    pub strategy: StrategyKind,
    pub confidence: f64,
    pub estimated_success: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl RecoveryStrategy {
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }
}

/// Creates strategies, enforcing global disablement.
///
/// A disabled kind still produces a strategy, but with `can_recover` set to
/// false, so [`recover`](super::ErrorRecoverySystem::recover) skips it.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    disabled: BTreeSet<StrategyKind>,
    backoff: BackoffConfig,
    max_retries: u32,
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::from_config(&ParserConfig::default())
    }
}

impl StrategyFactory {
    /// Derive disablement from configuration: `aiProvider.maxRetries == 0`
    /// disables retry, `aiProvider.enableValidationRetries == false`
    /// disables prompt enhancement, `fallback.enableSmartFallback == false`
    /// disables fallback.
    pub fn from_config(config: &ParserConfig) -> Self {
        let mut disabled = BTreeSet::new();
        if config.ai_provider.max_retries == 0 {
            disabled.insert(StrategyKind::Retry);
        }
        if !config.ai_provider.enable_validation_retries {
            disabled.insert(StrategyKind::EnhancePrompt);
        }
        if !config.fallback.enable_smart_fallback {
            disabled.insert(StrategyKind::Fallback);
        }
        Self {
            disabled,
            backoff: BackoffConfig::recovery(),
            max_retries: config.ai_provider.max_retries,
        }
    }

    /// Replace the delay curve used by retry strategies.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn disable(mut self, kind: StrategyKind) -> Self {
        self.disabled.insert(kind);
        self
    }

    pub fn is_enabled(&self, kind: StrategyKind) -> bool {
        !self.disabled.contains(&kind)
    }

    /// Retry strategy for attempt `attempt` (0 = first retry). Confidence
    /// decays by [`RETRY_DECAY`] per attempt and the delay follows the
    /// backoff curve.
    pub fn create_retry_strategy(&self, confidence: f64, attempt: u32) -> RecoveryStrategy {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let confidence = clamp_confidence(confidence * RETRY_DECAY.powi(exp));
        let delay = self.backoff.delay_for_attempt(attempt);
        RecoveryStrategy {
            can_recover: self.is_enabled(StrategyKind::Retry),
            strategy: StrategyKind::Retry,
            confidence,
            estimated_success: clamp_confidence(confidence * 0.9),
            retry_delay_ms: Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            max_retries: Some(self.max_retries),
        }
    }

    pub fn create_fallback_strategy(&self, confidence: f64) -> RecoveryStrategy {
        let confidence = clamp_confidence(confidence);
        RecoveryStrategy {
            can_recover: self.is_enabled(StrategyKind::Fallback),
            strategy: StrategyKind::Fallback,
            confidence,
            estimated_success: confidence,
            retry_delay_ms: None,
            max_retries: None,
        }
    }

    pub fn create_prompt_enhancement_strategy(&self, confidence: f64) -> RecoveryStrategy {
        let confidence = clamp_confidence(confidence);
        RecoveryStrategy {
            can_recover: self.is_enabled(StrategyKind::EnhancePrompt),
            strategy: StrategyKind::EnhancePrompt,
            confidence,
            estimated_success: clamp_confidence(confidence * 0.85),
            retry_delay_ms: None,
            max_retries: Some(self.max_retries),
        }
    }

    /// Strategy of `kind` at `confidence`, first attempt.
    pub fn create(&self, kind: StrategyKind, confidence: f64) -> RecoveryStrategy {
        match kind {
            StrategyKind::Retry => self.create_retry_strategy(confidence, 0),
            StrategyKind::Fallback => self.create_fallback_strategy(confidence),
            StrategyKind::EnhancePrompt => self.create_prompt_enhancement_strategy(confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_confidence_decays_and_delay_grows() {
        let factory = StrategyFactory::default();
        let first = factory.create_retry_strategy(0.9, 0);
        let third = factory.create_retry_strategy(0.9, 2);
        assert!((first.confidence - 0.9).abs() < 1e-9);
        assert!((third.confidence - 0.9 * 0.64).abs() < 1e-9);
        assert_eq!(first.retry_delay(), Some(Duration::from_secs(1)));
        assert_eq!(third.retry_delay(), Some(Duration::from_secs(4)));
        assert_eq!(first.max_retries, Some(3));
    }

    #[test]
    fn test_disablement_from_config() {
        let mut config = ParserConfig::default();
        config.ai_provider.max_retries = 0;
        config.fallback.enable_smart_fallback = false;
        let factory = StrategyFactory::from_config(&config);
        assert!(!factory.create_retry_strategy(0.9, 0).can_recover);
        assert!(!factory.create_fallback_strategy(0.8).can_recover);
        assert!(factory.create_prompt_enhancement_strategy(0.6).can_recover);

        config.ai_provider.enable_validation_retries = false;
        let factory = StrategyFactory::from_config(&config);
        assert!(!factory.create_prompt_enhancement_strategy(0.6).can_recover);
    }

    #[test]
    fn test_confidence_clamped() {
        let factory = StrategyFactory::default();
        assert_eq!(factory.create_fallback_strategy(1.7).confidence, 1.0);
        assert_eq!(factory.create(StrategyKind::EnhancePrompt, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_serializes_snake_case_kind() {
        let s = StrategyFactory::default().create_prompt_enhancement_strategy(0.7);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["strategy"], "enhance_prompt");
        assert_eq!(json["canRecover"], true);
    }
}
