//! Working-context construction, field inference, and ambiguity detection.
//!
//! Every stage takes a [`ParseContext`] by value and returns the enriched
//! one. Confidence only moves down after construction, never below
//! [`CONFIDENCE_FLOOR`], and ambiguities are only ever appended.

use crate::config::ContextEnhancementConfig;
use crate::json_repair;
use crate::load_test::{DurationSpec, DurationUnit, LoadPatternKind, TestType};
use crate::types::{clamp_confidence, Ambiguity, HintType, ParseContext, ParsingHint, StructuredData};
use regex::Regex;
use std::sync::LazyLock;

/// Lowest confidence any penalty can push a context to.
pub const CONFIDENCE_FLOOR: f64 = 0.1;
/// Penalty per substituted default during inference.
pub const DEFAULT_PENALTY: f64 = 0.05;
const CRITICAL_AMBIGUITY_PENALTY: f64 = 0.15;
const MINOR_AMBIGUITY_PENALTY: f64 = 0.05;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h)\b").expect("static regex must compile")
});
pub(crate) static AUTH_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(auth\w*|bearer|token|api[ _-]?key|login|credentials?)\b").expect("static regex must compile")
});
static CONSTANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(constant|steady|sustained|flat)\b").expect("static regex must compile"));

const USER_COUNT_KEYS: [&str; 6] = ["users", "vus", "virtual users", "concurrency", "clients", "rps"];
pub(crate) const CREDENTIAL_HEADERS: [&str; 4] = ["Authorization", "X-Api-Key", "Api-Key", "Cookie"];

/// Lower `confidence` by `penalty`, never below the floor and never raising
/// a value that is already under it.
pub fn penalize(confidence: f64, penalty: f64) -> f64 {
    if confidence <= CONFIDENCE_FLOOR {
        confidence
    } else {
        (confidence - penalty).max(CONFIDENCE_FLOOR)
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Test type named in the text, if any.
pub fn detect_test_type(text: &str) -> Option<TestType> {
    let lower = text.to_lowercase();
    let table: [(&[&str], TestType); 5] = [
        (&["spike"], TestType::Spike),
        (&["stress"], TestType::Stress),
        (&["endurance", "soak"], TestType::Endurance),
        (&["volume"], TestType::Volume),
        (&["baseline"], TestType::Baseline),
    ];
    table
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, t)| *t)
}

/// Explicit `N <unit>` duration in the text, if any.
pub fn detect_duration(text: &str) -> Option<DurationSpec> {
    DURATION_RE.captures_iter(text).find_map(|caps| {
        let value = caps[1].parse().ok()?;
        let unit = DurationUnit::from_token(&caps[2])?;
        Some(DurationSpec::new(value, unit))
    })
}

/// Load-pattern keyword in the text, if any.
pub fn detect_load_pattern(text: &str) -> Option<LoadPatternKind> {
    let lower = text.to_lowercase();
    if lower.contains("ramp") || lower.contains("gradual") {
        Some(LoadPatternKind::Ramp)
    } else if lower.contains("spike") {
        Some(LoadPatternKind::Spike)
    } else if CONSTANT_RE.is_match(text) {
        Some(LoadPatternKind::Constant)
    } else {
        None
    }
}

/// Builds and enriches [`ParseContext`]s.
#[derive(Debug, Clone, Default)]
pub struct ContextEnhancer {
    config: ContextEnhancementConfig,
}

impl ContextEnhancer {
    pub fn new(config: ContextEnhancementConfig) -> Self {
        Self { config }
    }

    /// Build, infer, and resolve in one call, honoring the enable flags.
    pub fn enhance(
        &self,
        original: &str,
        cleaned: &str,
        structured: &StructuredData,
        hints: &[ParsingHint],
    ) -> ParseContext {
        let mut ctx = self.build_context(original, cleaned, structured, hints);
        if self.config.enable_inference {
            ctx = self.infer_missing_fields(ctx);
        }
        if self.config.enable_ambiguity_resolution {
            ctx = self.resolve_ambiguities(ctx);
        }
        ctx
    }

    /// Merge structured data and hints into a fresh context.
    ///
    /// Confidence starts at 0.3 and grows with each non-empty component
    /// kind and with the mean hint confidence.
    pub fn build_context(
        &self,
        original: &str,
        cleaned: &str,
        structured: &StructuredData,
        hints: &[ParsingHint],
    ) -> ParseContext {
        let mut ctx = ParseContext {
            original_input: original.to_string(),
            cleaned_input: cleaned.to_string(),
            ..Default::default()
        };
        let components = &mut ctx.extracted_components;

        for method in &structured.methods {
            push_unique(&mut components.methods, method.to_ascii_uppercase());
        }
        for url in &structured.urls {
            push_unique(&mut components.urls, url.clone());
        }
        for (name, value) in &structured.headers {
            components.headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
        for body in &structured.json_blocks {
            push_unique(&mut components.bodies, body.clone());
        }
        for (key, value) in &structured.key_value_pairs {
            if USER_COUNT_KEYS.contains(&key.to_lowercase().as_str()) {
                if let Ok(n) = value.trim().parse::<u64>() {
                    push_unique(&mut components.counts, n);
                }
            }
        }

        for hint in hints {
            match hint.hint_type {
                HintType::Method => push_unique(&mut components.methods, hint.value.to_ascii_uppercase()),
                HintType::Url => push_unique(&mut components.urls, hint.value.clone()),
                HintType::Headers => {
                    if let Some((name, value)) = hint.value.split_once(':') {
                        components
                            .headers
                            .entry(name.trim().to_string())
                            .or_insert_with(|| value.trim().to_string());
                    }
                }
                HintType::Body => {
                    if let Some(value) = json_repair::parse_lenient(&hint.value).filter(|v| v.is_object()) {
                        push_unique(&mut components.bodies, value.to_string());
                    }
                }
                HintType::Count => {
                    if let Ok(n) = hint.value.parse::<u64>() {
                        push_unique(&mut components.counts, n);
                    }
                }
            }
        }

        let mut confidence = 0.3;
        let weights = [
            (!components.methods.is_empty(), 0.15),
            (!components.urls.is_empty(), 0.2),
            (!components.headers.is_empty(), 0.1),
            (!components.bodies.is_empty(), 0.1),
            (!components.counts.is_empty(), 0.1),
        ];
        confidence += weights.iter().filter(|(present, _)| *present).map(|(_, w)| w).sum::<f64>();
        if !hints.is_empty() {
            confidence += 0.1 * hints.iter().map(|h| h.confidence).sum::<f64>() / hints.len() as f64;
        }
        ctx.confidence = clamp_confidence(confidence);
        ctx
    }

    /// Fill test type, duration, and load pattern from the cleaned input.
    ///
    /// Fields already set are kept. Each substituted default records an
    /// assumption and costs [`DEFAULT_PENALTY`].
    pub fn infer_missing_fields(&self, mut ctx: ParseContext) -> ParseContext {
        let text = ctx.cleaned_input.clone();
        let mut defaults = Vec::new();

        if ctx.inferred_fields.test_type.is_none() {
            ctx.inferred_fields.test_type = Some(detect_test_type(&text).unwrap_or_else(|| {
                defaults.push("test type defaulted to 'load'");
                TestType::Load
            }));
        }
        if ctx.inferred_fields.duration.is_none() {
            ctx.inferred_fields.duration = Some(detect_duration(&text).unwrap_or_else(|| {
                defaults.push("duration defaulted to 30 seconds");
                DurationSpec::default()
            }));
        }
        if ctx.inferred_fields.load_pattern.is_none() {
            ctx.inferred_fields.load_pattern = Some(detect_load_pattern(&text).unwrap_or_else(|| {
                defaults.push("load pattern defaulted to 'constant'");
                LoadPatternKind::Constant
            }));
        }

        for assumption in defaults {
            ctx.confidence = penalize(ctx.confidence, DEFAULT_PENALTY);
            ctx.assumptions.push(assumption.to_string());
        }
        ctx
    }

    /// Append an ambiguity for each undetermined field not already covered.
    pub fn resolve_ambiguities(&self, mut ctx: ParseContext) -> ParseContext {
        let found = [
            method_ambiguity(&ctx),
            url_ambiguity(&ctx),
            user_count_ambiguity(&ctx),
            authentication_ambiguity(&ctx),
            content_type_ambiguity(&ctx),
        ];

        for ambiguity in found.into_iter().flatten() {
            if ctx.ambiguities.len() >= self.config.max_ambiguities {
                tracing::debug!(max = self.config.max_ambiguities, "ambiguity limit reached");
                break;
            }
            if ctx.has_ambiguity_for(&ambiguity.field) {
                continue;
            }
            let penalty = if matches!(ambiguity.field.as_str(), "method" | "url") {
                CRITICAL_AMBIGUITY_PENALTY
            } else {
                MINOR_AMBIGUITY_PENALTY
            };
            ctx.confidence = penalize(ctx.confidence, penalty);
            tracing::debug!(field = %ambiguity.field, reason = %ambiguity.reason, "ambiguity");
            ctx.ambiguities.push(ambiguity);
        }
        ctx
    }
}

fn method_ambiguity(ctx: &ParseContext) -> Option<Ambiguity> {
    let methods = &ctx.extracted_components.methods;
    match methods.len() {
        0 => Some(Ambiguity::new(
            "method",
            ["GET", "POST", "PUT", "DELETE"].map(String::from).to_vec(),
            "No HTTP method found in input",
        )),
        1 => None,
        _ => Some(Ambiguity::new("method", methods.clone(), "Multiple HTTP methods found")),
    }
}

fn url_ambiguity(ctx: &ParseContext) -> Option<Ambiguity> {
    let urls = &ctx.extracted_components.urls;
    match urls.as_slice() {
        [] => Some(Ambiguity::new(
            "url",
            vec!["https://api.example.com".to_string(), "http://localhost:3000".to_string()],
            "No URL found in input",
        )),
        [single] if single.starts_with('/') => Some(Ambiguity::new(
            "url",
            vec![format!("http://localhost{}", single), format!("https://api.example.com{}", single)],
            "Relative URL without a host",
        )),
        [_] => None,
        many => Some(Ambiguity::new("url", many.to_vec(), "Multiple URLs found")),
    }
}

fn user_count_ambiguity(ctx: &ParseContext) -> Option<Ambiguity> {
    let counts = &ctx.extracted_components.counts;
    match counts.len() {
        0 => Some(Ambiguity::new(
            "userCount",
            ["10", "50", "100"].map(String::from).to_vec(),
            "No user count specified",
        )),
        1 => None,
        _ => Some(Ambiguity::new(
            "userCount",
            counts.iter().map(u64::to_string).collect(),
            "Multiple counts found",
        )),
    }
}

fn authentication_ambiguity(ctx: &ParseContext) -> Option<Ambiguity> {
    let headers = &ctx.extracted_components.headers;
    let has_credentials = CREDENTIAL_HEADERS.iter().any(|h| headers.contains_key(*h));
    if has_credentials || !AUTH_MENTION_RE.is_match(&ctx.cleaned_input) {
        return None;
    }
    Some(Ambiguity::new(
        "authentication",
        ["Bearer token", "API key header", "Basic auth"].map(String::from).to_vec(),
        "Authentication mentioned but no credentials header found",
    ))
}

fn content_type_ambiguity(ctx: &ParseContext) -> Option<Ambiguity> {
    let components = &ctx.extracted_components;
    if components.bodies.is_empty() || components.headers.contains_key("Content-Type") {
        return None;
    }
    Some(Ambiguity::new(
        "contentType",
        vec!["application/json".to_string()],
        "Request body present without a Content-Type header",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatDetector;
    use crate::preprocess;

    fn context_for(input: &str) -> ParseContext {
        let cleaned = preprocess::sanitize(input);
        let structured = preprocess::extract_structured_data(&cleaned);
        let hints = FormatDetector::default().detect_format(&cleaned).hints;
        ContextEnhancer::default().build_context(input, &cleaned, &structured, &hints)
    }

    #[test]
    fn test_static_regexes_compile() {
        for re in [&*DURATION_RE, &*AUTH_MENTION_RE, &*CONSTANT_RE] {
            assert!(!re.as_str().is_empty());
        }
    }

    #[test]
    fn test_build_context_merges_and_scores() {
        let ctx = context_for(
            r#"curl -X POST https://api.example.com/users -H 'Content-Type: application/json' -d '{"name":"a"}'"#,
        );
        let c = &ctx.extracted_components;
        assert_eq!(c.methods, vec!["POST"]);
        assert_eq!(c.urls, vec!["https://api.example.com/users"]);
        assert_eq!(c.bodies.len(), 1);
        assert!(ctx.confidence > 0.8 && ctx.confidence <= 1.0);
    }

    #[test]
    fn test_build_context_empty_input() {
        let ctx = context_for("");
        assert!((ctx.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_counts_from_key_value_pairs() {
        let ctx = context_for("users: 25\nurl: https://a.test");
        assert_eq!(ctx.extracted_components.counts, vec![25]);
    }

    #[test]
    fn test_infer_explicit_fields() {
        let ctx = context_for("stress test /api for 5 minutes, ramp up gradually");
        let before = ctx.confidence;
        let ctx = ContextEnhancer::default().infer_missing_fields(ctx);
        let f = &ctx.inferred_fields;
        assert_eq!(f.test_type, Some(TestType::Stress));
        assert_eq!(f.duration, Some(DurationSpec::new(5, DurationUnit::Minutes)));
        assert_eq!(f.load_pattern, Some(LoadPatternKind::Ramp));
        assert!(ctx.assumptions.is_empty());
        assert_eq!(ctx.confidence, before);
    }

    #[test]
    fn test_infer_defaults_penalize_and_record() {
        let ctx = context_for("hit the api");
        let before = ctx.confidence;
        let ctx = ContextEnhancer::default().infer_missing_fields(ctx);
        assert_eq!(ctx.inferred_fields.test_type, Some(TestType::Load));
        assert_eq!(ctx.inferred_fields.duration, Some(DurationSpec::seconds(30)));
        assert_eq!(ctx.inferred_fields.load_pattern, Some(LoadPatternKind::Constant));
        assert_eq!(ctx.assumptions.len(), 3);
        assert!((before - ctx.confidence - 3.0 * DEFAULT_PENALTY).abs() < 1e-9);
    }

    #[test]
    fn test_soak_maps_to_endurance() {
        assert_eq!(detect_test_type("overnight SOAK run"), Some(TestType::Endurance));
        assert_eq!(detect_duration("run for 2h"), Some(DurationSpec::new(2, DurationUnit::Hours)));
        assert_eq!(detect_duration("200 users"), None);
    }

    #[test]
    fn test_missing_method_and_url_yield_ambiguities() {
        let ctx = context_for("please run a quick check");
        assert!(ctx.extracted_components.methods.is_empty());
        assert!(ctx.extracted_components.urls.is_empty());

        let ctx = ContextEnhancer::default().resolve_ambiguities(ctx);
        for field in ["method", "url"] {
            let a = ctx.ambiguities.iter().find(|a| a.field == field).unwrap();
            assert!(a.possible_values.len() >= 2, "{} has {:?}", field, a.possible_values);
        }
    }

    #[test]
    fn test_relative_url_offers_localhost() {
        let ctx = ContextEnhancer::default().resolve_ambiguities(context_for("GET /health with 10 users"));
        let a = ctx.ambiguities.iter().find(|a| a.field == "url").unwrap();
        assert!(a.possible_values.contains(&"http://localhost/health".to_string()));
    }

    #[test]
    fn test_body_without_content_type() {
        let ctx = ContextEnhancer::default().resolve_ambiguities(context_for(r#"POST https://a.test/x {"k": 1}"#));
        let a = ctx.ambiguities.iter().find(|a| a.field == "contentType").unwrap();
        assert_eq!(a.possible_values, vec!["application/json"]);
    }

    #[test]
    fn test_auth_mentioned_without_header() {
        let enhancer = ContextEnhancer::default();
        let ctx = enhancer.resolve_ambiguities(context_for("GET https://a.test/me with a bearer token"));
        assert!(ctx.has_ambiguity_for("authentication"));

        let ctx = enhancer.resolve_ambiguities(context_for("GET https://a.test/me\nAuthorization: Bearer x"));
        assert!(!ctx.has_ambiguity_for("authentication"));
    }

    #[test]
    fn test_resolve_is_idempotent_and_monotonic() {
        let enhancer = ContextEnhancer::default();
        let ctx = context_for("do something");
        let before = ctx.confidence;
        let once = enhancer.resolve_ambiguities(ctx);
        assert!(once.confidence <= before);
        let twice = enhancer.resolve_ambiguities(once.clone());
        assert_eq!(once.ambiguities, twice.ambiguities);
        assert_eq!(once.confidence, twice.confidence);
    }

    #[test]
    fn test_max_ambiguities_respected() {
        let enhancer = ContextEnhancer::new(ContextEnhancementConfig {
            max_ambiguities: 1,
            ..Default::default()
        });
        let ctx = enhancer.resolve_ambiguities(context_for("nothing useful"));
        assert_eq!(ctx.ambiguities.len(), 1);
    }

    #[test]
    fn test_confidence_stays_in_bounds_after_every_stage() {
        let enhancer = ContextEnhancer::default();
        for input in ["", "x", "GET /a\nPOST /b\n{bad", "curl https://a.test -H 'A-B: c' -d '{}' 5 users 1 min"] {
            let ctx = context_for(input);
            assert!((0.0..=1.0).contains(&ctx.confidence));
            let ctx = enhancer.infer_missing_fields(ctx);
            assert!((0.0..=1.0).contains(&ctx.confidence));
            let ctx = enhancer.resolve_ambiguities(ctx);
            assert!((0.0..=1.0).contains(&ctx.confidence));
            assert!(ctx.confidence >= CONFIDENCE_FLOOR);
        }
    }

    #[test]
    fn test_penalize_floor() {
        assert_eq!(penalize(0.12, 0.15), CONFIDENCE_FLOOR);
        assert_eq!(penalize(0.05, 0.15), 0.05);
    }
}
