//! Working types shared by the preprocessing, detection, and enhancement stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::load_test::{DurationSpec, LoadPatternKind, TestType};

/// Clamp a confidence score into `[0.0, 1.0]`, mapping NaN to `0.0`.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Coarse structure pulled out of sanitized input. Produced once per input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredData {
    /// Valid JSON objects, stored in compact canonical form.
    pub json_blocks: Vec<String>,
    pub urls: Vec<String>,
    /// Header name (Title-Case) to value.
    pub headers: BTreeMap<String, String>,
    /// Upper-case HTTP methods in order of first appearance.
    pub methods: Vec<String>,
    pub key_value_pairs: BTreeMap<String, String>,
}

impl StructuredData {
    pub fn is_empty(&self) -> bool {
        self.json_blocks.is_empty()
            && self.urls.is_empty()
            && self.headers.is_empty()
            && self.methods.is_empty()
            && self.key_value_pairs.is_empty()
    }
}

/// The kind of fragment a [`ParsingHint`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintType {
    Method,
    Url,
    Headers,
    Body,
    Count,
}

/// Byte span of a hint inside the analysed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintPosition {
    pub start: usize,
    pub end: usize,
}

/// A typed, positioned, confidence-scored fragment extracted from input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingHint {
    #[serde(rename = "type")]
    pub hint_type: HintType,
    pub value: String,
    pub confidence: f64,
    pub position: HintPosition,
}

impl ParsingHint {
    pub fn new(hint_type: HintType, value: impl Into<String>, confidence: f64, start: usize, end: usize) -> Self {
        Self {
            hint_type,
            value: value.into(),
            confidence: clamp_confidence(confidence),
            position: HintPosition { start, end },
        }
    }
}

/// Everything the extraction stages found, merged and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedComponents {
    pub methods: Vec<String>,
    pub urls: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub bodies: Vec<String>,
    pub counts: Vec<u64>,
}

/// Test fields inferred from prose rather than extracted from structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredFields {
    pub test_type: Option<TestType>,
    pub duration: Option<DurationSpec>,
    pub load_pattern: Option<LoadPatternKind>,
}

/// A field the pipeline could not determine with high confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ambiguity {
    pub field: String,
    pub possible_values: Vec<String>,
    pub reason: String,
}

impl Ambiguity {
    pub fn new(field: &str, possible_values: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            possible_values,
            reason: reason.into(),
        }
    }
}

/// Working context, progressively enriched by the context enhancer.
///
/// Each enhancement stage consumes a context and returns a new one; the
/// ambiguity list only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseContext {
    pub original_input: String,
    pub cleaned_input: String,
    pub extracted_components: ExtractedComponents,
    pub inferred_fields: InferredFields,
    pub ambiguities: Vec<Ambiguity>,
    /// Defaults substituted during inference, in human-readable form.
    pub assumptions: Vec<String>,
    pub confidence: f64,
}

impl ParseContext {
    pub fn has_ambiguity_for(&self, field: &str) -> bool {
        self.ambiguities.iter().any(|a| a.field == field)
    }
}

/// Which path produced a parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSource {
    /// The first AI response was accepted.
    Ai,
    /// A recovery strategy other than fallback produced the result.
    Recovered,
    /// The deterministic parser produced the result.
    Fallback,
}

impl ParseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseSource::Ai => "ai",
            ParseSource::Recovered => "recovered",
            ParseSource::Fallback => "fallback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.4), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert!((clamp_confidence(0.42) - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hint_confidence_is_clamped() {
        let hint = ParsingHint::new(HintType::Url, "/users", 3.0, 0, 6);
        assert_eq!(hint.confidence, 1.0);
    }

    #[test]
    fn test_hint_serializes_type_field() {
        let hint = ParsingHint::new(HintType::Method, "POST", 0.9, 8, 12);
        let json = serde_json::to_value(&hint).unwrap();
        assert_eq!(json["type"], "method");
        assert_eq!(json["position"]["start"], 8);
    }

    #[test]
    fn test_structured_data_default_is_empty() {
        assert!(StructuredData::default().is_empty());
    }
}
