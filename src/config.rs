//! Tunables consumed by every pipeline stage.
//!
//! [`ParserConfig`] mirrors the JSON shape callers use (camelCase sections).
//! [`ConfigManager`] is the single process-wide owner: reads hand out
//! clones, writes replace the whole object after validation.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreprocessingConfig {
    pub enable_sanitization: bool,
    pub enable_structure_extraction: bool,
    /// Maximum input length in characters; longer input is truncated.
    pub max_input_length: usize,
    pub normalize_whitespace: bool,
    pub separate_requests: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            enable_sanitization: true,
            enable_structure_extraction: true,
            max_input_length: 10_000,
            normalize_whitespace: true,
            separate_requests: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatDetectionConfig {
    /// Detections below this confidence count as inaccurate in diagnostics.
    pub confidence_threshold: f64,
    pub enable_multi_format_detection: bool,
    /// When false only the natural-language default rule is evaluated.
    pub enable_pattern_matching: bool,
}

impl Default for FormatDetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            enable_multi_format_detection: true,
            enable_pattern_matching: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextEnhancementConfig {
    pub enable_inference: bool,
    pub enable_ambiguity_resolution: bool,
    pub max_ambiguities: usize,
}

impl Default for ContextEnhancementConfig {
    fn default() -> Self {
        Self {
            enable_inference: true,
            enable_ambiguity_resolution: true,
            max_ambiguities: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiProviderConfig {
    /// Recovery attempts per error; 0 disables the `retry` strategy.
    pub max_retries: u32,
    pub temperature: f64,
    /// When false the `enhance_prompt` strategy is disabled.
    pub enable_validation_retries: bool,
    pub timeout_ms: u64,
}

impl Default for AiProviderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            temperature: 0.1,
            enable_validation_retries: true,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackConfig {
    /// When false the `fallback` strategy is disabled.
    pub enable_smart_fallback: bool,
    pub fallback_confidence_threshold: f64,
    pub max_fallback_attempts: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enable_smart_fallback: true,
            fallback_confidence_threshold: 0.3,
            max_fallback_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    pub enable_diagnostics: bool,
    pub log_level: String,
    pub metrics_retention_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            enable_diagnostics: true,
            log_level: "info".to_string(),
            metrics_retention_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Complete parser configuration. Every field has a default, so partial
/// documents deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserConfig {
    pub preprocessing: PreprocessingConfig,
    pub format_detection: FormatDetectionConfig,
    pub context_enhancement: ContextEnhancementConfig,
    pub ai_provider: AiProviderConfig,
    pub fallback: FallbackConfig,
    pub monitoring: MonitoringConfig,
}

/// Check a configuration, returning one message per problem.
pub fn validate_config(config: &ParserConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let unit = |v: f64| (0.0..=1.0).contains(&v);

    if config.preprocessing.max_input_length == 0 {
        errors.push("preprocessing.maxInputLength must be greater than 0".to_string());
    }
    if !unit(config.format_detection.confidence_threshold) {
        errors.push("formatDetection.confidenceThreshold must be between 0 and 1".to_string());
    }
    if !(0.0..=2.0).contains(&config.ai_provider.temperature) {
        errors.push("aiProvider.temperature must be between 0 and 2".to_string());
    }
    if config.ai_provider.timeout_ms == 0 {
        errors.push("aiProvider.timeoutMs must be greater than 0".to_string());
    }
    if config.ai_provider.max_retries > 10 {
        errors.push("aiProvider.maxRetries must be at most 10".to_string());
    }
    if !unit(config.fallback.fallback_confidence_threshold) {
        errors.push("fallback.fallbackConfidenceThreshold must be between 0 and 1".to_string());
    }
    if !LOG_LEVELS.contains(&config.monitoring.log_level.as_str()) {
        errors.push(format!(
            "monitoring.logLevel must be one of {}, got '{}'",
            LOG_LEVELS.join(", "),
            config.monitoring.log_level
        ));
    }
    if config.monitoring.metrics_retention_ms == 0 {
        errors.push("monitoring.metricsRetentionMs must be greater than 0".to_string());
    }
    errors
}

/// Recursively merge `patch` into `base`. Objects merge key by key; any other
/// value replaces.
fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                deep_merge(base.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Process-wide configuration owner.
///
/// Constructed once, shared via `Arc`, and passed to every stage.
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: RwLock<ParserConfig>,
}

impl ConfigManager {
    /// Create a manager from a configuration, rejecting invalid values.
    pub fn new(config: ParserConfig) -> Result<Self> {
        let errors = validate_config(&config);
        if !errors.is_empty() {
            return Err(PipelineError::InvalidConfig(errors.join("; ")));
        }
        Ok(Self {
            config: RwLock::new(config),
        })
    }

    /// Load from a (possibly partial) JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ParserConfig = serde_json::from_str(json)?;
        Self::new(config)
    }

    /// Load from a (possibly partial) YAML document.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ParserConfig = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::InvalidConfig(format!("YAML: {}", e)))?;
        Self::new(config)
    }

    /// A snapshot of the current configuration.
    pub fn get_config(&self) -> ParserConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Deep-merge a partial camelCase JSON object into the current config.
    ///
    /// The merged result is validated first; on error nothing changes.
    pub fn update_config(&self, partial: &Value) -> Result<()> {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        let mut merged = serde_json::to_value(&*guard)?;
        deep_merge(&mut merged, partial);
        let next: ParserConfig = serde_json::from_value(merged)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        let errors = validate_config(&next);
        if !errors.is_empty() {
            return Err(PipelineError::InvalidConfig(errors.join("; ")));
        }
        tracing::debug!(?partial, "configuration updated");
        *guard = next;
        Ok(())
    }

    pub fn reset_to_defaults(&self) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = ParserConfig::default();
    }

    pub fn validate_config(&self, config: &ParserConfig) -> Vec<String> {
        validate_config(config)
    }
}
