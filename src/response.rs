//! Normalization of AI provider output into a [`LoadTestSpec`].
//!
//! The provider is asked for a JSON object shaped like a `LoadTestSpec`, but what
//! comes back is routinely wrapped in reasoning blocks or code fences, has
//! fields missing, or uses loose types (`"duration": "5m"`). Extraction and
//! backfill happen on the untyped [`Value`]; only the fully repaired object
//! is deserialized.

use crate::context::{detect_duration, detect_test_type, AUTH_MENTION_RE, CREDENTIAL_HEADERS};
use crate::error::{PipelineError, Result};
use crate::fallback::IntelligentFallbackParser;
use crate::json_repair;
use crate::load_test::{
    generate_spec_id, CorrelationRule, DurationSpec, DurationUnit, LoadPatternKind, LoadTestSpec, ResponseValidation,
    TestType, VariableDefinition, VariableType, WorkflowStep,
};
use crate::preprocess;
use crate::types::{clamp_confidence, Ambiguity, ParseContext};
use crate::validator::is_placeholder_url;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

/// Users assumed when neither the response nor the input gives a count.
pub const DEFAULT_VIRTUAL_USERS: u32 = 10;

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex must compile"));
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?(.*?)```").expect("static regex must compile"));
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("static regex must compile")
});

const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// Ordered substring rules mapping a variable name to a generator type.
///
/// The first rule whose pattern occurs in the lower-cased name wins; names
/// matching nothing become [`VariableType::String`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableTypeRules {
    rules: Vec<(String, VariableType)>,
}

impl Default for VariableTypeRules {
    fn default() -> Self {
        Self::new(vec![
            ("uuid".into(), VariableType::Uuid),
            ("time".into(), VariableType::Timestamp),
            ("date".into(), VariableType::Timestamp),
            ("id".into(), VariableType::RandomId),
        ])
    }
}

impl VariableTypeRules {
    pub fn new(rules: Vec<(String, VariableType)>) -> Self {
        let rules = rules.into_iter().map(|(p, t)| (p.to_lowercase(), t)).collect();
        Self { rules }
    }

    /// Add a rule evaluated before all existing ones.
    pub fn with_rule(mut self, pattern: impl Into<String>, var_type: VariableType) -> Self {
        self.rules.insert(0, (pattern.into().to_lowercase(), var_type));
        self
    }

    pub fn infer(&self, name: &str) -> VariableType {
        let lower = name.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| lower.contains(pattern.as_str()))
            .map_or(VariableType::String, |(_, t)| *t)
    }

    /// A definition for `name` with the inferred type's default parameters.
    pub fn define(&self, name: &str) -> VariableDefinition {
        let var_type = self.infer(name);
        VariableDefinition {
            name: name.to_string(),
            var_type,
            parameters: var_type.default_parameters(),
        }
    }

    /// `existing` plus a definition for every `{{name}}` in `template` that
    /// `existing` does not cover.
    pub fn synthesize(&self, template: &str, existing: Vec<VariableDefinition>) -> Vec<VariableDefinition> {
        let mut variables = existing;
        for name in placeholders(template) {
            if !variables.iter().any(|v| v.name == name) {
                variables.push(self.define(&name));
            }
        }
        variables
    }
}

/// Distinct `{{name}}` placeholders in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Locate and parse the JSON object in raw provider output.
///
/// `<think>` blocks are dropped, a fenced block is preferred when present,
/// and everything outside the first balanced `{…}` is ignored. An object cut
/// off mid-way is handed to the repair pass as-is.
pub fn extract_json_object(raw: &str) -> Result<Map<String, Value>> {
    let without_thinking = THINK_RE.replace_all(raw, "");
    let body = FENCE_RE
        .captures(&without_thinking)
        .and_then(|caps| caps.get(1))
        .map_or(without_thinking.as_ref(), |m| m.as_str());

    let candidate = json_repair::first_balanced(body, '{', '}')
        .or_else(|| body.find('{').map(|start| &body[start..]))
        .ok_or_else(|| PipelineError::Other("invalid AI response: no JSON object found".to_string()))?;

    match json_repair::parse_lenient(candidate) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(PipelineError::Other("invalid AI response: unparseable JSON object".to_string())),
    }
}

/// One-line summary of the input, used where a description is missing.
pub(crate) fn describe_input(input: &str) -> String {
    let first_line = input.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if first_line.is_empty() {
        return "Generated load test".to_string();
    }
    let snippet: String = first_line.chars().take(120).collect();
    if snippet.len() < first_line.len() {
        format!("Generated from: {}...", snippet)
    } else {
        format!("Generated from: {}", snippet)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn as_count(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }?;
    u32::try_from(n).ok().filter(|n| *n > 0)
}

/// Coerce the loose duration shapes providers emit into `{value, unit}`.
fn coerce_duration(value: &Value) -> Option<DurationSpec> {
    let spec = match value {
        Value::Number(n) => n.as_u64().map(DurationSpec::seconds),
        Value::String(s) => {
            detect_duration(s).or_else(|| s.trim().parse().ok().map(DurationSpec::seconds))
        }
        Value::Object(obj) => {
            let amount = obj.get("value").and_then(as_count)?;
            let unit = match obj.get("unit").and_then(Value::as_str) {
                Some(token) => DurationUnit::from_token(token)?,
                None => DurationUnit::Seconds,
            };
            Some(DurationSpec::new(u64::from(amount), unit))
        }
        _ => None,
    }?;
    (spec.value > 0).then_some(spec)
}

fn drop_if_invalid<T: serde::de::DeserializeOwned>(obj: &mut Map<String, Value>, key: &str) {
    if let Some(value) = obj.get(key) {
        if serde_json::from_value::<T>(value.clone()).is_err() {
            tracing::debug!(field = key, "dropping malformed field from AI response");
            obj.remove(key);
        }
    }
}

/// Result of parsing one AI response. Always carries a usable spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    pub spec: LoadTestSpec,
    pub confidence: f64,
    /// Defaults substituted while backfilling.
    pub assumptions: Vec<String>,
    pub ambiguities: Vec<Ambiguity>,
    pub suggestions: Vec<String>,
    /// The response could not be parsed and the deterministic parser ran.
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

struct Backfilled {
    object: Map<String, Value>,
    assumptions: Vec<String>,
    load_backfilled: bool,
}

/// Turns raw provider text into a scored, backfilled specification.
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    rules: VariableTypeRules,
    fallback: IntelligentFallbackParser,
}

impl ResponseParser {
    pub fn new(rules: VariableTypeRules) -> Self {
        Self {
            fallback: IntelligentFallbackParser::new(rules.clone()),
            rules,
        }
    }

    pub fn rules(&self) -> &VariableTypeRules {
        &self.rules
    }

    /// Parse `raw`, falling back to deterministic extraction from the
    /// original input when the response is unusable. Never fails.
    pub fn parse_response(&self, raw: &str, ctx: &ParseContext) -> ParsedResponse {
        match self.parse_strict(raw, ctx) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "AI response unusable, using fallback parser");
                let result = self.fallback.parse(&ctx.original_input);
                let ambiguities = self.find_ambiguities(&result.spec, ctx);
                let suggestions = self.suggestions(&result.spec, &ambiguities, true);
                ParsedResponse {
                    spec: result.spec,
                    confidence: result.confidence,
                    assumptions: result.assumptions,
                    ambiguities,
                    suggestions,
                    used_fallback: true,
                    parse_error: Some(err.to_string()),
                }
            }
        }
    }

    /// Like [`parse_response`](Self::parse_response) but surfaces extraction
    /// and deserialization failures instead of falling back.
    pub fn parse_strict(&self, raw: &str, ctx: &ParseContext) -> Result<ParsedResponse> {
        let object = extract_json_object(raw)?;
        let Backfilled {
            object,
            assumptions,
            load_backfilled,
        } = self.backfill(object, ctx);
        let mut spec: LoadTestSpec = serde_json::from_value(Value::Object(object))?;
        self.finish_requests(&mut spec);

        let confidence = self.calculate_confidence(&spec, ctx, load_backfilled);
        let ambiguities = self.find_ambiguities(&spec, ctx);
        let suggestions = self.suggestions(&spec, &ambiguities, load_backfilled);
        tracing::debug!(
            requests = spec.requests.len(),
            confidence,
            assumptions = assumptions.len(),
            "AI response parsed"
        );
        Ok(ParsedResponse {
            spec,
            confidence,
            assumptions,
            ambiguities,
            suggestions,
            used_fallback: false,
            parse_error: None,
        })
    }

    fn backfill(&self, mut obj: Map<String, Value>, ctx: &ParseContext) -> Backfilled {
        let mut assumptions = Vec::new();
        let inferred = &ctx.inferred_fields;

        let requests = self.backfill_requests(&mut obj, ctx, &mut assumptions);
        obj.insert("requests".into(), Value::Array(requests));

        if non_empty_str(&obj, "id").is_none() {
            obj.insert("id".into(), Value::from(generate_spec_id()));
        }

        let test_type = obj
            .get("testType")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value::<TestType>(Value::from(s.trim().to_lowercase())).ok())
            .unwrap_or_else(|| {
                let fallback = inferred.test_type.unwrap_or_default();
                assumptions.push(format!("test type set to '{}'", fallback));
                fallback
            });
        obj.insert("testType".into(), Value::from(test_type.as_str()));

        if non_empty_str(&obj, "name").is_none() {
            let target = obj
                .get("requests")
                .and_then(|r| r.get(0))
                .map(|r| {
                    format!(
                        "{} {}",
                        r.get("method").and_then(Value::as_str).unwrap_or("GET"),
                        r.get("url").and_then(Value::as_str).unwrap_or("")
                    )
                })
                .unwrap_or_else(|| "requests".to_string());
            let name = format!("{} test: {}", capitalize(test_type.as_str()), target.trim());
            obj.insert("name".into(), Value::from(name));
        }
        if non_empty_str(&obj, "description").is_none() {
            obj.insert("description".into(), Value::from(describe_input(&ctx.original_input)));
        }

        let load_backfilled = self.backfill_load_pattern(&mut obj, ctx, &mut assumptions);

        let duration = obj.get("duration").and_then(coerce_duration).unwrap_or_else(|| {
            let fallback = inferred.duration.unwrap_or_default();
            assumptions.push(format!("duration set to {}", fallback));
            fallback
        });
        obj.insert("duration".into(), json!({"value": duration.value, "unit": duration.unit}));

        drop_if_invalid::<Vec<WorkflowStep>>(&mut obj, "workflow");
        drop_if_invalid::<Vec<CorrelationRule>>(&mut obj, "dataCorrelation");

        Backfilled {
            object: obj,
            assumptions,
            load_backfilled,
        }
    }

    fn backfill_requests(
        &self,
        obj: &mut Map<String, Value>,
        ctx: &ParseContext,
        assumptions: &mut Vec<String>,
    ) -> Vec<Value> {
        let raw = match obj.remove("requests") {
            Some(Value::Array(items)) => items,
            Some(single @ Value::Object(_)) => vec![single],
            _ => match obj.remove("request") {
                Some(single @ Value::Object(_)) => vec![single],
                _ if obj.contains_key("url") => {
                    let mut lifted = Map::new();
                    for key in ["method", "url", "headers", "payload"] {
                        if let Some(v) = obj.remove(key) {
                            lifted.insert(key.to_string(), v);
                        }
                    }
                    vec![Value::Object(lifted)]
                }
                _ => Vec::new(),
            },
        };

        let components = &ctx.extracted_components;
        raw.into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .enumerate()
            .map(|(i, mut req)| {
                let method = match non_empty_str(&req, "method") {
                    Some(m) => m.to_ascii_uppercase(),
                    None => {
                        let m = components.methods.get(i).or(components.methods.first());
                        let m = m.cloned().unwrap_or_else(|| "GET".to_string());
                        assumptions.push(format!("requests[{}]: method set to {}", i, m));
                        m
                    }
                };
                req.insert("method".into(), Value::from(method));

                let url = match non_empty_str(&req, "url") {
                    Some(u) => u.to_string(),
                    None => {
                        let u = components.urls.get(i).or(components.urls.first()).cloned().unwrap_or_default();
                        if !u.is_empty() {
                            assumptions.push(format!("requests[{}]: url taken from input", i));
                        }
                        u
                    }
                };
                req.insert("url".into(), Value::from(url));

                let headers: Map<String, Value> = match req.remove("headers") {
                    Some(Value::Object(h)) => h
                        .into_iter()
                        .map(|(k, v)| {
                            let v = match v {
                                Value::String(s) => s,
                                other => other.to_string(),
                            };
                            (k, Value::from(v))
                        })
                        .collect(),
                    _ => Map::new(),
                };
                req.insert("headers".into(), Value::Object(headers));

                match req.remove("payload") {
                    None | Some(Value::Null) => {}
                    Some(payload) => {
                        req.insert("payload".into(), self.normalize_payload(payload));
                    }
                }
                drop_if_invalid::<Vec<ResponseValidation>>(&mut req, "validation");
                Value::Object(req)
            })
            .collect()
    }

    fn normalize_payload(&self, payload: Value) -> Value {
        let (template, declared) = match payload {
            Value::String(s) => (s, Vec::new()),
            Value::Object(mut map) if map.contains_key("template") => {
                let template = match map.remove("template") {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let declared = match map.remove("variables") {
                    Some(Value::Array(vars)) => vars,
                    _ => Vec::new(),
                };
                (template, declared)
            }
            body => (body.to_string(), Vec::new()),
        };

        let existing: Vec<VariableDefinition> = declared
            .iter()
            .filter_map(|v| {
                let name = v.get("name").and_then(Value::as_str)?;
                let var_type = v
                    .get("type")
                    .and_then(|t| serde_json::from_value::<VariableType>(t.clone()).ok())
                    .unwrap_or_else(|| self.rules.infer(name));
                let parameters = v
                    .get("parameters")
                    .and_then(Value::as_object)
                    .cloned()
                    .or_else(|| var_type.default_parameters());
                Some(VariableDefinition {
                    name: name.to_string(),
                    var_type,
                    parameters,
                })
            })
            .collect();

        let variables = self.rules.synthesize(&template, existing);
        json!({ "template": template, "variables": variables })
    }

    /// Returns whether load parameters had to be invented.
    fn backfill_load_pattern(
        &self,
        obj: &mut Map<String, Value>,
        ctx: &ParseContext,
        assumptions: &mut Vec<String>,
    ) -> bool {
        let mut pattern = match obj.remove("loadPattern") {
            Some(Value::Object(p)) => p,
            _ => Map::new(),
        };

        let kind = pattern
            .get("type")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value::<LoadPatternKind>(Value::from(s.trim().to_lowercase())).ok())
            .or(ctx.inferred_fields.load_pattern)
            .unwrap_or_default();
        pattern.insert("type".into(), Value::from(kind.as_str()));

        let users = pattern.get("virtualUsers").and_then(as_count);
        let rate = pattern.get("requestsPerSecond").and_then(as_count);
        pattern.remove("virtualUsers");
        pattern.remove("requestsPerSecond");
        if let Some(n) = users {
            pattern.insert("virtualUsers".into(), Value::from(n));
        }
        if let Some(n) = rate {
            pattern.insert("requestsPerSecond".into(), Value::from(n));
        }

        let backfilled = users.is_none() && rate.is_none();
        if backfilled {
            let n = ctx
                .extracted_components
                .counts
                .first()
                .and_then(|c| u32::try_from(*c).ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_VIRTUAL_USERS);
            assumptions.push(format!("virtual users set to {}", n));
            pattern.insert("virtualUsers".into(), Value::from(n));
        }

        for key in ["rampUpTime", "plateauTime"] {
            match pattern.get(key).and_then(coerce_duration) {
                Some(d) => {
                    pattern.insert(key.into(), json!({"value": d.value, "unit": d.unit}));
                }
                None => {
                    pattern.remove(key);
                }
            }
        }

        obj.insert("loadPattern".into(), Value::Object(pattern));
        backfilled
    }

    /// Default `Content-Type: application/json` on POST/PUT/PATCH requests
    /// with a payload. Applies whenever Content-Type is absent, even if other
    /// headers are present; an existing Content-Type is never replaced.
    fn finish_requests(&self, spec: &mut LoadTestSpec) {
        for request in &mut spec.requests {
            let has_content_type = request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
            if request.payload.is_some() && BODY_METHODS.contains(&request.method.as_str()) && !has_content_type {
                request.headers.insert("Content-Type".into(), "application/json".into());
            }
        }
    }

    /// Score a backfilled spec. `load_backfilled` marks that the response
    /// carried neither a user count nor a rate.
    pub fn calculate_confidence(&self, spec: &LoadTestSpec, ctx: &ParseContext, load_backfilled: bool) -> f64 {
        let text = &ctx.cleaned_input;
        let mut confidence = 1.0;
        if spec.requests.is_empty() {
            confidence -= 0.3;
        }
        if spec.requests.iter().any(|r| is_placeholder_url(&r.url)) {
            confidence -= 0.2;
        }
        if load_backfilled {
            confidence -= 0.1;
        }
        if detect_test_type(text).is_some() {
            confidence += 0.1;
        }
        if !preprocess::extract_methods(text).is_empty() {
            confidence += 0.1;
        }
        clamp_confidence(confidence)
    }

    /// Open questions about the enhanced spec, one per category at most.
    pub fn find_ambiguities(&self, spec: &LoadTestSpec, ctx: &ParseContext) -> Vec<Ambiguity> {
        let mut found = Vec::new();
        let text = &ctx.cleaned_input;

        if preprocess::extract_methods(text).is_empty() {
            let mut values: Vec<String> = spec.requests.iter().map(|r| r.method.clone()).collect();
            for m in ["GET", "POST"] {
                if !values.iter().any(|v| v == m) {
                    values.push(m.to_string());
                }
            }
            found.push(Ambiguity::new("method", values, "HTTP method was not stated in the input"));
        }

        if let Some(url) = spec.requests.iter().map(|r| r.url.as_str()).find(|u| is_placeholder_url(u) || u.starts_with('/')) {
            let values = if url.starts_with('/') {
                vec![format!("http://localhost{}", url), format!("https://api.example.com{}", url)]
            } else {
                vec![url.to_string(), "http://localhost:3000".to_string()]
            };
            found.push(Ambiguity::new("url", values, "Target URL is missing a real host"));
        }

        if ctx.extracted_components.counts.is_empty() {
            let current = spec
                .load_pattern
                .virtual_users
                .or(spec.load_pattern.requests_per_second)
                .unwrap_or(DEFAULT_VIRTUAL_USERS)
                .to_string();
            let mut values = vec![current];
            for n in ["50", "100"] {
                if !values.iter().any(|v| v == n) {
                    values.push(n.to_string());
                }
            }
            found.push(Ambiguity::new("userCount", values, "Load level was not stated in the input"));
        }

        let has_credentials = spec
            .requests
            .iter()
            .any(|r| r.headers.keys().any(|k| CREDENTIAL_HEADERS.iter().any(|c| c.eq_ignore_ascii_case(k))));
        if AUTH_MENTION_RE.is_match(text) && !has_credentials {
            found.push(Ambiguity::new(
                "authentication",
                ["Bearer token", "API key header", "Basic auth"].map(String::from).to_vec(),
                "Authentication mentioned but no request carries credentials",
            ));
        }

        let untyped_body = spec.requests.iter().any(|r| {
            r.payload.is_some() && !r.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"))
        });
        if untyped_body {
            found.push(Ambiguity::new(
                "contentType",
                vec!["application/json".to_string(), "application/x-www-form-urlencoded".to_string()],
                "Request body without a Content-Type header",
            ));
        }
        found
    }

    pub fn suggestions(&self, spec: &LoadTestSpec, ambiguities: &[Ambiguity], load_backfilled: bool) -> Vec<String> {
        let mut out = Vec::new();
        if spec.requests.is_empty() {
            out.push("Describe at least one request with a method and URL".to_string());
        }
        for ambiguity in ambiguities {
            let suggestion = match ambiguity.field.as_str() {
                "method" => "State the HTTP method explicitly (e.g. POST)",
                "url" => "Give the full target URL including scheme and host",
                "userCount" => "Say how many virtual users or requests per second to apply",
                "authentication" => "Include the Authorization header or API key to send",
                "contentType" => "Add a Content-Type header for the request body",
                _ => continue,
            };
            out.push(suggestion.to_string());
        }
        if load_backfilled && !ambiguities.iter().any(|a| a.field == "userCount") {
            out.push("Say how many virtual users or requests per second to apply".to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextEnhancer;
    use crate::format::FormatDetector;
    use crate::validator::CommandValidator;

    fn enhanced(input: &str) -> ParseContext {
        let cleaned = preprocess::sanitize(input);
        let structured = preprocess::extract_structured_data(&cleaned);
        let hints = FormatDetector::default().detect_format(&cleaned).hints;
        ContextEnhancer::default().enhance(input, &cleaned, &structured, &hints)
    }

    #[test]
    fn test_extracts_fenced_object_after_thinking() {
        let raw = "<think>maybe {not this}</think>\nHere you go:\n```json\n{\"name\": \"x\"}\n```\nDone.";
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(obj["name"], "x");
    }

    #[test]
    fn test_extracts_truncated_object() {
        let raw = r#"{"requests": [{"method": "GET", "url": "https://shop.test/a"}"#;
        let obj = extract_json_object(raw).unwrap();
        assert_eq!(obj["requests"][0]["url"], "https://shop.test/a");
    }

    #[test]
    fn test_no_object_is_error() {
        let err = extract_json_object("I cannot help with that").unwrap_err();
        assert!(err.to_string().contains("invalid AI response"));
    }

    #[test]
    fn test_backfills_method_headers_and_variables() {
        let ctx = enhanced("POST https://shop.test/orders with 50 users");
        let raw = r#"```json
{"requests": [{"url": "https://shop.test/orders",
  "payload": {"template": "{\"orderId\": \"{{orderId}}\", \"at\": \"{{createdTime}}\", \"ref\": \"{{requestUuid}}\", \"note\": \"{{note}}\"}"}}],
 "loadPattern": {"type": "ramp", "virtualUsers": 50}}
```"#;
        let parsed = ResponseParser::default().parse_response(raw, &ctx);
        assert!(!parsed.used_fallback, "{:?}", parsed.parse_error);

        let request = &parsed.spec.requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.headers["Content-Type"], "application/json");
        let vars = &request.payload.as_ref().unwrap().variables;
        let type_of = |name: &str| vars.iter().find(|v| v.name == name).map(|v| v.var_type);
        assert_eq!(type_of("orderId"), Some(VariableType::RandomId));
        assert_eq!(type_of("createdTime"), Some(VariableType::Timestamp));
        assert_eq!(type_of("requestUuid"), Some(VariableType::Uuid));
        assert_eq!(type_of("note"), Some(VariableType::String));
        assert_eq!(vars.iter().find(|v| v.name == "note").unwrap().parameters.as_ref().unwrap()["length"], 10);

        assert!(parsed.spec.id.starts_with("loadtest_"));
        assert!(!parsed.spec.name.is_empty());
        assert_eq!(parsed.spec.load_pattern.pattern_type, LoadPatternKind::Ramp);
        assert_eq!(parsed.confidence, 1.0);
        assert!(CommandValidator.validate(&parsed.spec).is_valid());
    }

    #[test]
    fn test_content_type_defaulted_only_when_absent() {
        let ctx = enhanced("POST https://shop.test/orders and PUT https://shop.test/orders/1");
        let raw = r#"{"requests": [
            {"method": "POST", "url": "https://shop.test/orders",
             "headers": {"Authorization": "Bearer t"}, "payload": {"template": "{}"}},
            {"method": "PUT", "url": "https://shop.test/orders/1",
             "headers": {"content-type": "text/plain"}, "payload": {"template": "x"}},
            {"method": "GET", "url": "https://shop.test/orders"}]}"#;
        let parsed = ResponseParser::default().parse_response(raw, &ctx);
        assert!(!parsed.used_fallback, "{:?}", parsed.parse_error);

        let requests = &parsed.spec.requests;
        assert_eq!(requests[0].headers["Content-Type"], "application/json");
        assert_eq!(requests[0].headers["Authorization"], "Bearer t");
        assert_eq!(requests[1].headers.len(), 1);
        assert_eq!(requests[1].headers["content-type"], "text/plain");
        assert!(requests[2].headers.is_empty());
    }

    #[test]
    fn test_missing_load_and_placeholder_url_lower_confidence() {
        let ctx = enhanced("hit the api");
        let raw = r#"{"name": "x", "requests": [{"method": "get", "url": "https://api.example.com"}]}"#;
        let parsed = ResponseParser::default().parse_response(raw, &ctx);
        assert!((parsed.confidence - 0.7).abs() < 1e-9, "{}", parsed.confidence);
        assert_eq!(parsed.spec.requests[0].method, "GET");
        assert_eq!(parsed.spec.load_pattern.virtual_users, Some(DEFAULT_VIRTUAL_USERS));
        assert_eq!(parsed.spec.duration, DurationSpec::seconds(30));

        let fields: Vec<&str> = parsed.ambiguities.iter().map(|a| a.field.as_str()).collect();
        assert!(fields.contains(&"method"));
        assert!(fields.contains(&"url"));
        assert!(fields.contains(&"userCount"));
        assert!(parsed.ambiguities.iter().all(|a| a.possible_values.len() >= 2));
        assert!(!parsed.suggestions.is_empty());
    }

    #[test]
    fn test_zero_requests_penalized() {
        let ctx = enhanced("run something");
        let parsed = ResponseParser::default().parse_response(r#"{"name": "empty"}"#, &ctx);
        assert!(!parsed.used_fallback);
        assert!(parsed.spec.requests.is_empty());
        assert!((parsed.confidence - 0.6).abs() < 1e-9, "{}", parsed.confidence);
        assert!(!CommandValidator.validate(&parsed.spec).is_valid());
    }

    #[test]
    fn test_mentions_raise_confidence_and_clamp() {
        let ctx = enhanced("stress test GET https://shop.test/home");
        let raw = r#"{"requests": [{"url": "https://shop.test/home"}]}"#;
        let parsed = ResponseParser::default().parse_response(raw, &ctx);
        // 1.0 - 0.1 (no load) + 0.1 + 0.1, clamped.
        assert_eq!(parsed.confidence, 1.0);
        assert_eq!(parsed.spec.test_type, TestType::Stress);
    }

    #[test]
    fn test_loose_field_types_coerced() {
        let ctx = enhanced("GET https://shop.test/home");
        let raw = r#"{"testType": "SPIKE", "duration": "5m",
            "loadPattern": {"virtualUsers": "1,000", "rampUpTime": 30},
            "requests": [{"method": "GET", "url": "https://shop.test/home", "headers": {"X-Retry": 3}}],
            "workflow": "not a list"}"#;
        let parsed = ResponseParser::default().parse_response(raw, &ctx);
        assert!(!parsed.used_fallback, "{:?}", parsed.parse_error);
        let spec = &parsed.spec;
        assert_eq!(spec.test_type, TestType::Spike);
        assert_eq!(spec.duration, DurationSpec::new(5, DurationUnit::Minutes));
        assert_eq!(spec.load_pattern.virtual_users, Some(1000));
        assert_eq!(spec.load_pattern.ramp_up_time, Some(DurationSpec::seconds(30)));
        assert_eq!(spec.requests[0].headers["X-Retry"], "3");
        assert!(spec.workflow.is_none());
    }

    #[test]
    fn test_top_level_request_fields_lifted() {
        let ctx = enhanced("DELETE https://shop.test/cart/1");
        let raw = r#"{"method": "DELETE", "url": "https://shop.test/cart/1"}"#;
        let parsed = ResponseParser::default().parse_response(raw, &ctx);
        assert_eq!(parsed.spec.requests.len(), 1);
        assert_eq!(parsed.spec.requests[0].method, "DELETE");
    }

    #[test]
    fn test_unparseable_response_uses_fallback() {
        let ctx = enhanced("POST https://shop.test/login");
        let parsed = ResponseParser::default().parse_response("Sorry, I can't do that.", &ctx);
        assert!(parsed.used_fallback);
        assert!(parsed.parse_error.is_some());
        assert!(parsed.confidence < 0.5);
        assert_eq!(parsed.spec.requests[0].url, "https://shop.test/login");
        assert!(CommandValidator.validate(&parsed.spec).is_valid());
    }

    #[test]
    fn test_variable_rules_are_ordered_and_overridable() {
        let rules = VariableTypeRules::default();
        assert_eq!(rules.infer("userId"), VariableType::RandomId);
        assert_eq!(rules.infer("sessionUUID"), VariableType::Uuid);
        assert_eq!(rules.infer("startDate"), VariableType::Timestamp);
        assert_eq!(rules.infer("promoCode"), VariableType::String);

        let rules = rules.with_rule("code", VariableType::Sequence);
        assert_eq!(rules.infer("promoCode"), VariableType::Sequence);
        let def = rules.define("promoCode");
        assert_eq!(def.parameters.unwrap()["step"], 1);
    }

    #[test]
    fn test_declared_variables_kept() {
        let rules = VariableTypeRules::default();
        let declared = vec![VariableDefinition {
            name: "userId".into(),
            var_type: VariableType::Sequence,
            parameters: None,
        }];
        let vars = rules.synthesize(r#"{"a":"{{userId}}","b":"{{ name }}","c":"{{userId}}"}"#, declared);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].var_type, VariableType::Sequence);
        assert_eq!(vars[1].name, "name");
    }

    #[test]
    fn test_describe_input() {
        assert_eq!(describe_input("  \n"), "Generated load test");
        assert_eq!(describe_input("GET /x\nmore"), "Generated from: GET /x");
    }
}
