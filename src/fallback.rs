//! Deterministic, AI-free extraction of a minimal load-test spec.
//!
//! Used when the provider is disabled, its response is unusable, or recovery
//! picks the `fallback` strategy. The result always passes
//! [`CommandValidator`](crate::validator::CommandValidator) and is scored
//! below 0.5 so callers can tell it apart from an AI-assisted parse.

use crate::context::{detect_duration, detect_test_type};
use crate::load_test::{
    generate_spec_id, DurationSpec, LoadPattern, LoadPatternKind, LoadTestSpec, PayloadSpec, RequestSpec, TestType,
    WorkflowStep,
};
use crate::preprocess;
use crate::response::{describe_input, VariableTypeRules};
use crate::validator::DEFAULT_BASE_URL;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Request rate used when the input names no load level.
pub const DEFAULT_REQUEST_RATE: u32 = 10;
const BASE_CONFIDENCE: f64 = 0.2;
const FOUND_BONUS: f64 = 0.1;

static USERS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d[\d,]*)\s*(?:concurrent\s+|virtual\s+|simultaneous\s+|parallel\s+)?(?:users|vus|clients|connections)\b")
        .expect("static regex must compile")
});
static RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d[\d,]*)\s*(?:rps|req/s|requests?\s*(?:per|/|a)\s*(?:second|sec|s))\b")
        .expect("static regex must compile")
});

fn first_count(re: &Regex, text: &str) -> Option<u32> {
    re.captures_iter(text)
        .find_map(|caps| caps[1].replace(',', "").parse::<u32>().ok().filter(|n| *n > 0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackResult {
    pub spec: LoadTestSpec,
    pub confidence: f64,
    /// Every default substituted, in human-readable form.
    pub assumptions: Vec<String>,
}

struct Extracted {
    request: RequestSpec,
    method_found: bool,
    url_found: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IntelligentFallbackParser {
    rules: VariableTypeRules,
}

impl IntelligentFallbackParser {
    pub fn new(rules: VariableTypeRules) -> Self {
        Self { rules }
    }

    pub fn parse(&self, input: &str) -> FallbackResult {
        let cleaned = preprocess::sanitize(input);
        let mut assumptions = Vec::new();

        // Only segments naming a target count as separate requests.
        let segments: Vec<String> = preprocess::separate_requests(&cleaned)
            .into_iter()
            .filter(|s| !preprocess::extract_urls(s).is_empty())
            .collect();
        let segments = if segments.len() < 2 { vec![cleaned.clone()] } else { segments };
        let multi = segments.len() > 1;

        let mut requests = Vec::with_capacity(segments.len());
        let mut all_methods = true;
        let mut all_urls = true;
        for (i, segment) in segments.iter().enumerate() {
            let mut notes = Vec::new();
            let extracted = self.extract_request(segment, &mut notes);
            all_methods &= extracted.method_found;
            all_urls &= extracted.url_found;
            for note in notes {
                assumptions.push(if multi { format!("request {}: {}", i + 1, note) } else { note });
            }
            requests.push(extracted.request);
        }

        let load_pattern = self.load_pattern(&cleaned, &mut assumptions);
        let duration = detect_duration(&cleaned).filter(|d| d.value > 0).unwrap_or_else(|| {
            assumptions.push("duration defaulted to 30 seconds".to_string());
            DurationSpec::default()
        });
        let test_type = detect_test_type(&cleaned).unwrap_or_else(|| {
            assumptions.push("test type defaulted to 'load'".to_string());
            TestType::Load
        });

        let workflow = multi.then(|| {
            (0..requests.len())
                .map(|i| WorkflowStep {
                    name: format!("step {}", i + 1),
                    request_index: i,
                    think_time_ms: None,
                    condition: None,
                })
                .collect()
        });

        let name = requests
            .first()
            .map_or_else(|| "Fallback".to_string(), |r| format!("Fallback: {} {}", r.method, r.url));
        let spec = LoadTestSpec {
            id: generate_spec_id(),
            name,
            description: describe_input(&cleaned),
            test_type,
            requests,
            load_pattern,
            duration,
            workflow,
            data_correlation: None,
        };

        let mut confidence = BASE_CONFIDENCE;
        if all_methods {
            confidence += FOUND_BONUS;
        }
        if all_urls {
            confidence += FOUND_BONUS;
        }

        tracing::info!(
            requests = spec.requests.len(),
            confidence,
            assumptions = assumptions.len(),
            "fallback parse complete"
        );
        FallbackResult {
            spec,
            confidence,
            assumptions,
        }
    }

    fn extract_request(&self, segment: &str, notes: &mut Vec<String>) -> Extracted {
        let headers = preprocess::extract_headers(segment);
        let body = preprocess::extract_json_blocks(segment).into_iter().next();

        let method_found;
        let method = match preprocess::extract_methods(segment).into_iter().next() {
            Some(m) => {
                method_found = true;
                m
            }
            None => {
                method_found = false;
                let m = if body.is_some() { "POST" } else { "GET" };
                if body.is_some() {
                    notes.push("HTTP method defaulted to POST because a body is present".to_string());
                } else {
                    notes.push("HTTP method defaulted to GET".to_string());
                }
                m.to_string()
            }
        };

        let urls = preprocess::extract_urls(segment);
        let url_found = !urls.is_empty();
        let url = match urls.into_iter().next() {
            Some(path) if path.starts_with('/') => {
                notes.push(format!("relative URL {} qualified with http://localhost", path));
                format!("http://localhost{}", path)
            }
            Some(url) => url,
            None => {
                notes.push(format!("URL defaulted to {}", DEFAULT_BASE_URL));
                DEFAULT_BASE_URL.to_string()
            }
        };

        let mut request = RequestSpec::new(method, url);
        request.headers = headers;
        if let Some(template) = body {
            if !request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                notes.push("Content-Type defaulted to application/json".to_string());
                request.headers.insert("Content-Type".into(), "application/json".into());
            }
            let variables = self.rules.synthesize(&template, Vec::new());
            request.payload = Some(PayloadSpec { template, variables });
        }

        Extracted {
            request,
            method_found,
            url_found,
        }
    }

    fn load_pattern(&self, text: &str, assumptions: &mut Vec<String>) -> LoadPattern {
        let virtual_users = first_count(&USERS_RE, text);
        let mut requests_per_second = first_count(&RATE_RE, text);
        if virtual_users.is_none() && requests_per_second.is_none() {
            assumptions.push(format!("request rate defaulted to {} per second", DEFAULT_REQUEST_RATE));
            requests_per_second = Some(DEFAULT_REQUEST_RATE);
        }
        LoadPattern {
            pattern_type: LoadPatternKind::Constant,
            virtual_users,
            requests_per_second,
            ramp_up_time: None,
            plateau_time: None,
        }
    }
}
