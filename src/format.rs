//! Input format classification and parsing hints.
//!
//! Detection is an ordered table of [`FormatRule`]s evaluated by one
//! dispatcher: the first rule whose predicate holds wins. The
//! natural-language rule sits last and always matches, so detection never
//! fails.

use crate::config::FormatDetectionConfig;
use crate::json_repair;
use crate::preprocess::{self, ABSOLUTE_URL_RE, METHOD_RE, PATH_URL_RE};
use crate::types::{clamp_confidence, HintType, ParsingHint};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static CURL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)(?:^|[\s$>`])curl\s").expect("static regex must compile"));
static CURL_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:-X|--request)\s*['\x22]?([A-Za-z]+)").expect("static regex must compile")
});
static CURL_HEADER_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:-H|--header)\s+(?:'([^']*)'|"([^"]*)")"#).expect("static regex must compile")
});
static CURL_DATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)(?:-d|--data(?:-raw|-binary)?|--json)\s").expect("static regex must compile"));
static REQUEST_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\s+(\S+)\s+HTTP/\d(?:\.\d)?\s*$")
        .expect("static regex must compile")
});
static HEADER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([A-Za-z][A-Za-z0-9-]*):[ \t]*(\S.*)$").expect("static regex must compile")
});
static EXPLICIT_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d[\d,]*)\s*(?:concurrent\s+|virtual\s+|simultaneous\s+|parallel\s+)?(?:users|requests|rps|vus|clients|connections)\b",
    )
    .expect("static regex must compile")
});
static LOOSE_COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d[\d,]*)\s*(?:times|iterations|calls|hits|x)\b").expect("static regex must compile")
});
static LOOSE_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(get|post|put|delete|patch|fetch|create|update|remove)\b").expect("static regex must compile")
});

/// Syntactic shape of raw input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    CurlCommand,
    HttpRaw,
    JsonWithText,
    MixedStructured,
    ConcatenatedRequests,
    NaturalLanguage,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::CurlCommand => "curl_command",
            InputFormat::HttpRaw => "http_raw",
            InputFormat::JsonWithText => "json_with_text",
            InputFormat::MixedStructured => "mixed_structured",
            InputFormat::ConcatenatedRequests => "concatenated_requests",
            InputFormat::NaturalLanguage => "natural_language",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the detection table.
#[derive(Clone)]
pub struct FormatRule {
    pub format: InputFormat,
    /// Lower runs first.
    pub priority: u8,
    pub base_confidence: f64,
    predicate: fn(&str) -> bool,
    scorer: fn(&str, f64) -> f64,
    hint_extractor: fn(&str) -> Vec<ParsingHint>,
}

impl FormatRule {
    pub fn new(
        format: InputFormat,
        priority: u8,
        base_confidence: f64,
        predicate: fn(&str) -> bool,
        scorer: fn(&str, f64) -> f64,
        hint_extractor: fn(&str) -> Vec<ParsingHint>,
    ) -> Self {
        Self {
            format,
            priority,
            base_confidence,
            predicate,
            scorer,
            hint_extractor,
        }
    }

    pub fn matches(&self, input: &str) -> bool {
        (self.predicate)(input)
    }

    pub fn confidence(&self, input: &str) -> f64 {
        clamp_confidence((self.scorer)(input, self.base_confidence))
    }

    pub fn hints(&self, input: &str) -> Vec<ParsingHint> {
        (self.hint_extractor)(input)
    }
}

impl fmt::Debug for FormatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRule")
            .field("format", &self.format)
            .field("priority", &self.priority)
            .field("base_confidence", &self.base_confidence)
            .finish()
    }
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDetection {
    pub format: InputFormat,
    pub confidence: f64,
    pub hints: Vec<ParsingHint>,
    /// Other formats whose predicates also held, in rule order.
    pub alternatives: Vec<InputFormat>,
}

impl FormatDetection {
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn parsing_hints(&self) -> &[ParsingHint] {
        &self.hints
    }
}

/// Classifies sanitized input.
#[derive(Debug, Clone)]
pub struct FormatDetector {
    rules: Vec<FormatRule>,
    pattern_matching: bool,
    multi_format: bool,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(&FormatDetectionConfig::default())
    }
}

impl FormatDetector {
    pub fn new(config: &FormatDetectionConfig) -> Self {
        Self::with_rules(default_rules())
            .pattern_matching(config.enable_pattern_matching)
            .multi_format(config.enable_multi_format_detection)
    }

    /// Use a custom rule table. The table is sorted by priority; a
    /// natural-language catch-all is appended if missing.
    pub fn with_rules(mut rules: Vec<FormatRule>) -> Self {
        if !rules.iter().any(|r| r.format == InputFormat::NaturalLanguage) {
            rules.push(natural_language_rule());
        }
        rules.sort_by_key(|r| r.priority);
        Self {
            rules,
            pattern_matching: true,
            multi_format: true,
        }
    }

    pub fn pattern_matching(mut self, enabled: bool) -> Self {
        self.pattern_matching = enabled;
        self
    }

    pub fn multi_format(mut self, enabled: bool) -> Self {
        self.multi_format = enabled;
        self
    }

    pub fn rules(&self) -> &[FormatRule] {
        &self.rules
    }

    pub fn detect_format(&self, input: &str) -> FormatDetection {
        let candidates: Vec<&FormatRule> = self
            .rules
            .iter()
            .filter(|r| self.pattern_matching || r.format == InputFormat::NaturalLanguage)
            .collect();

        let Some(winner) = candidates.iter().find(|r| r.matches(input)) else {
            // Unreachable with the catch-all present; kept total for custom tables.
            return FormatDetection {
                format: InputFormat::NaturalLanguage,
                confidence: 0.0,
                hints: extract_hints(input),
                alternatives: Vec::new(),
            };
        };

        let alternatives = if self.multi_format {
            candidates
                .iter()
                .filter(|r| r.format != winner.format && r.format != InputFormat::NaturalLanguage)
                .filter(|r| r.matches(input))
                .map(|r| r.format)
                .collect()
        } else {
            Vec::new()
        };

        let detection = FormatDetection {
            format: winner.format,
            confidence: winner.confidence(input),
            hints: winner.hints(input),
            alternatives,
        };
        tracing::debug!(
            format = %detection.format,
            confidence = detection.confidence,
            hints = detection.hints.len(),
            "format detected"
        );
        detection
    }
}

/// The built-in rule table, in priority order.
pub fn default_rules() -> Vec<FormatRule> {
    vec![
        FormatRule::new(
            InputFormat::ConcatenatedRequests,
            10,
            0.7,
            is_concatenated,
            score_concatenated,
            extract_hints,
        ),
        FormatRule::new(InputFormat::CurlCommand, 20, 0.9, is_curl, score_curl, curl_hints),
        FormatRule::new(InputFormat::HttpRaw, 30, 0.85, is_http_raw, score_http_raw, extract_hints),
        FormatRule::new(
            InputFormat::JsonWithText,
            40,
            0.6,
            is_json_with_text,
            score_json_with_text,
            extract_hints,
        ),
        FormatRule::new(
            InputFormat::MixedStructured,
            50,
            0.5,
            is_mixed_structured,
            score_mixed_structured,
            extract_hints,
        ),
        natural_language_rule(),
    ]
}

fn natural_language_rule() -> FormatRule {
    FormatRule::new(
        InputFormat::NaturalLanguage,
        u8::MAX,
        0.3,
        |_| true,
        score_natural_language,
        extract_hints,
    )
}

fn has_request_signal(segment: &str) -> bool {
    METHOD_RE.is_match(segment) || ABSOLUTE_URL_RE.is_match(segment) || CURL_RE.is_match(segment)
}

fn is_concatenated(input: &str) -> bool {
    let segments = preprocess::separate_requests(input);
    segments.len() >= 2 && segments.iter().filter(|s| has_request_signal(s)).count() >= 2
}

fn score_concatenated(input: &str, base: f64) -> f64 {
    let signalled = preprocess::separate_requests(input)
        .iter()
        .filter(|s| has_request_signal(s))
        .count();
    (base + 0.05 * signalled.saturating_sub(2) as f64).min(0.9)
}

fn is_curl(input: &str) -> bool {
    CURL_RE.is_match(input)
}

fn score_curl(input: &str, base: f64) -> f64 {
    let has_url = ABSOLUTE_URL_RE.is_match(input);
    let signals = [
        CURL_METHOD_RE.is_match(input),
        CURL_HEADER_FLAG_RE.is_match(input),
        CURL_DATA_RE.is_match(input),
        has_url,
    ]
    .into_iter()
    .filter(|s| *s)
    .count();
    let start = if has_url { base } else { base - 0.2 };
    start + 0.02 * signals as f64
}

fn is_http_raw(input: &str) -> bool {
    REQUEST_LINE_RE.is_match(input)
}

fn score_http_raw(input: &str, base: f64) -> f64 {
    let header_lines = HEADER_LINE_RE.captures_iter(input).count();
    let has_host = HEADER_LINE_RE
        .captures_iter(input)
        .any(|c| c[1].eq_ignore_ascii_case("host"));
    let mut score = base;
    if has_host {
        score += 0.05;
    }
    if header_lines > usize::from(has_host) {
        score += 0.05;
    }
    score
}

/// Non-whitespace characters outside every `{…}` region.
fn text_outside_json(input: &str) -> usize {
    let mut outside = 0;
    let mut cursor = 0;
    for (start, end) in json_repair::balanced_regions(input, '{', '}') {
        outside += input[cursor..start].chars().filter(|c| !c.is_whitespace()).count();
        cursor = end + 1;
    }
    outside + input[cursor..].chars().filter(|c| !c.is_whitespace()).count()
}

fn is_json_with_text(input: &str) -> bool {
    !preprocess::extract_json_blocks(input).is_empty() && text_outside_json(input) >= 3
}

fn score_json_with_text(input: &str, base: f64) -> f64 {
    let mut score = base;
    if METHOD_RE.is_match(input) {
        score += 0.1;
    }
    if ABSOLUTE_URL_RE.is_match(input) || PATH_URL_RE.is_match(input) {
        score += 0.1;
    }
    score
}

fn structure_kinds(input: &str) -> (bool, bool, bool, bool) {
    let data = preprocess::extract_structured_data(input);
    (
        !data.methods.is_empty(),
        !data.urls.is_empty(),
        !data.headers.is_empty(),
        data.key_value_pairs.len() >= 2,
    )
}

fn is_mixed_structured(input: &str) -> bool {
    let (methods, urls, headers, pairs) = structure_kinds(input);
    (headers || pairs) && (methods || urls)
}

fn score_mixed_structured(input: &str, base: f64) -> f64 {
    let (methods, urls, headers, pairs) = structure_kinds(input);
    let kinds = [methods, urls, headers, pairs].into_iter().filter(|k| *k).count();
    (base + 0.1 * kinds.saturating_sub(2) as f64).min(0.8)
}

fn score_natural_language(input: &str, base: f64) -> f64 {
    if input.trim().is_empty() {
        return 0.1;
    }
    let mut score = base;
    if LOOSE_METHOD_RE.is_match(input) {
        score += 0.1;
    }
    if ABSOLUTE_URL_RE.is_match(input) || PATH_URL_RE.is_match(input) {
        score += 0.1;
    }
    if EXPLICIT_COUNT_RE.is_match(input) {
        score += 0.1;
    }
    score.min(0.6)
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.replace(',', "").parse().ok()
}

/// Hints shared by every format: methods, URLs, headers, JSON bodies, counts.
pub fn extract_hints(input: &str) -> Vec<ParsingHint> {
    let mut hints = Vec::new();

    for m in METHOD_RE.find_iter(input) {
        hints.push(ParsingHint::new(HintType::Method, m.as_str(), 0.9, m.start(), m.end()));
    }
    for m in ABSOLUTE_URL_RE.find_iter(input) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ')', '\'', '"']);
        hints.push(ParsingHint::new(HintType::Url, url, 0.95, m.start(), m.start() + url.len()));
    }
    for caps in PATH_URL_RE.captures_iter(input) {
        if let Some(m) = caps.get(1) {
            let path = m.as_str().trim_end_matches(['.', ',', ';', ')', '\'', '"']);
            if path.len() > 1 {
                hints.push(ParsingHint::new(HintType::Url, path, 0.95, m.start(), m.start() + path.len()));
            }
        }
    }
    for caps in HEADER_LINE_RE.captures_iter(input) {
        if let Some(whole) = caps.get(0) {
            let name = preprocess::normalize_header_name(&caps[1]);
            if preprocess::extract_headers(whole.as_str()).contains_key(&name) {
                hints.push(ParsingHint::new(
                    HintType::Headers,
                    format!("{}: {}", name, caps[2].trim()),
                    0.8,
                    whole.start(),
                    whole.end(),
                ));
            }
        }
    }
    for (start, end) in json_repair::balanced_regions(input, '{', '}') {
        let body = &input[start..=end];
        let confidence = if json_repair::parse_lenient(body).is_some_and(|v| v.is_object()) {
            0.9
        } else {
            0.5
        };
        hints.push(ParsingHint::new(HintType::Body, body, confidence, start, end + 1));
    }
    for caps in EXPLICIT_COUNT_RE.captures_iter(input) {
        if let (Some(m), Some(n)) = (caps.get(0), parse_count(&caps[1])) {
            hints.push(ParsingHint::new(HintType::Count, n.to_string(), 0.8, m.start(), m.end()));
        }
    }
    for caps in LOOSE_COUNT_RE.captures_iter(input) {
        if let (Some(m), Some(n)) = (caps.get(0), parse_count(&caps[1])) {
            hints.push(ParsingHint::new(HintType::Count, n.to_string(), 0.6, m.start(), m.end()));
        }
    }

    hints.sort_by_key(|h| h.position.start);
    hints
}

/// Curl hints: the shared set plus `-X` methods and `-H` headers.
fn curl_hints(input: &str) -> Vec<ParsingHint> {
    let mut hints = extract_hints(input);

    for caps in CURL_METHOD_RE.captures_iter(input) {
        if let Some(m) = caps.get(1) {
            let method = m.as_str().to_ascii_uppercase();
            let seen = hints
                .iter()
                .any(|h| h.hint_type == HintType::Method && h.position.start == m.start());
            if !seen {
                hints.push(ParsingHint::new(HintType::Method, method, 0.9, m.start(), m.end()));
            }
        }
    }
    for caps in CURL_HEADER_FLAG_RE.captures_iter(input) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            if let Some((name, value)) = m.as_str().split_once(':') {
                hints.push(ParsingHint::new(
                    HintType::Headers,
                    format!("{}: {}", preprocess::normalize_header_name(name), value.trim()),
                    0.8,
                    m.start(),
                    m.end(),
                ));
            }
        }
    }

    hints.sort_by_key(|h| h.position.start);
    hints
}
