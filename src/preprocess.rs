//! Input normalization and coarse structure extraction.
//!
//! Nothing in here fails: malformed or empty input degrades to an empty
//! [`StructuredData`] and an empty cleaned string.

use crate::config::PreprocessingConfig;
use crate::json_repair;
use crate::load_test::HTTP_METHODS;
use crate::types::StructuredData;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SPACE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").expect("static regex must compile"));
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex must compile"));
pub(crate) static ABSOLUTE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s'"<>`\\]+"#).expect("static regex must compile"));
pub(crate) static PATH_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^|[\s'"(\[=,])(/[A-Za-z0-9_~%{}.\-][^\s'"<>`)\]]*)"#).expect("static regex must compile")
});
pub(crate) static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\b").expect("static regex must compile")
});
static CURL_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:-H|--header)\s+(?:'([^']*)'|"([^"]*)")"#).expect("static regex must compile")
});
static LINE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z][A-Za-z0-9-]*)[ \t]*:[ \t]*(\S.*?)[ \t]*$").expect("static regex must compile")
});
static QUOTED_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([A-Za-z][A-Za-z0-9-]*)"\s*:\s*"([^"]*)""#).expect("static regex must compile")
});
static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_ .-]{0,40}?)[ \t]*[:=][ \t]*(\S.*?)[ \t]*$")
        .expect("static regex must compile")
});
static RULE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|={3,})$").expect("static regex must compile"));
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s").expect("static regex must compile"));
static REQUEST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:request|req)\s*#?\d+\s*[:.)\-]\s*(.*)$").expect("static regex must compile")
});
static NUMBERED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}[.)]\s+(.*)$").expect("static regex must compile"));

const KNOWN_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
    "cache-control",
    "connection",
    "content-length",
    "content-type",
    "cookie",
    "host",
    "origin",
    "pragma",
    "referer",
    "user-agent",
];

/// Output of one preprocessing run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preprocessed {
    pub cleaned: String,
    pub structured: StructuredData,
    /// Independent request descriptions; a single element for ordinary input.
    pub segments: Vec<String>,
    /// Whether the input exceeded `maxInputLength` and was cut.
    pub truncated: bool,
}

/// Config-driven front end over the free functions in this module.
#[derive(Debug, Clone, Default)]
pub struct InputPreprocessor {
    config: PreprocessingConfig,
}

impl InputPreprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, input: &str) -> Preprocessed {
        let (bounded, truncated) = truncate_input(input, self.config.max_input_length);
        if truncated {
            tracing::warn!(
                limit = self.config.max_input_length,
                "input exceeds maxInputLength, truncating"
            );
        }

        let mut cleaned = bounded.to_string();
        if self.config.enable_sanitization {
            cleaned = strip_control_chars(&cleaned);
        }
        if self.config.normalize_whitespace {
            cleaned = normalize_whitespace(&cleaned);
        } else {
            cleaned = cleaned.trim().to_string();
        }

        let structured = if self.config.enable_structure_extraction {
            extract_structured_data(&cleaned)
        } else {
            StructuredData::default()
        };

        let segments = if self.config.separate_requests {
            separate_requests(&cleaned)
        } else if cleaned.is_empty() {
            Vec::new()
        } else {
            vec![cleaned.clone()]
        };

        Preprocessed {
            cleaned,
            structured,
            segments,
            truncated,
        }
    }
}

/// Full sanitization: control characters, line endings, and whitespace.
pub fn sanitize(input: &str) -> String {
    normalize_whitespace(&strip_control_chars(input))
}

/// Normalize line endings and drop control characters other than `\n`/`\t`.
fn strip_control_chars(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn normalize_whitespace(input: &str) -> String {
    let lines: Vec<String> = input
        .lines()
        .map(|line| SPACE_RUN_RE.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    BLANK_RUN_RE.replace_all(&joined, "\n\n").trim().to_string()
}

/// Cut `input` to at most `max_chars` characters on a char boundary.
pub fn truncate_input(input: &str, max_chars: usize) -> (&str, bool) {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&input[..byte_idx], true),
        None => (input, false),
    }
}

/// Title-Case each `-`-separated segment: `content-type` → `Content-Type`.
pub fn normalize_header_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn looks_like_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    KNOWN_HEADERS.contains(&lower.as_str()) || (lower.contains('-') && !lower.starts_with('-'))
}

fn trim_url(raw: &str) -> &str {
    raw.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'])
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

/// All URLs in order of appearance, absolute forms and `/path` forms.
pub fn extract_urls(input: &str) -> Vec<String> {
    let mut spans: Vec<(usize, String)> = ABSOLUTE_URL_RE
        .find_iter(input)
        .map(|m| (m.start(), trim_url(m.as_str()).to_string()))
        .collect();
    for caps in PATH_URL_RE.captures_iter(input) {
        if let Some(m) = caps.get(1) {
            let path = trim_url(m.as_str());
            if path.len() > 1 {
                spans.push((m.start(), path.to_string()));
            }
        }
    }
    spans.sort_by_key(|(start, _)| *start);

    let mut urls = Vec::new();
    for (_, url) in spans {
        push_unique(&mut urls, url);
    }
    urls
}

/// Headers from curl flags, `Key: value` lines, and `"Key": "value"` pairs.
pub fn extract_headers(input: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let mut add = |name: &str, value: &str| {
        let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
        if !name.trim().is_empty() {
            headers
                .entry(normalize_header_name(name))
                .or_insert_with(|| value.to_string());
        }
    };

    for caps in CURL_HEADER_RE.captures_iter(input) {
        let raw = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        if let Some((name, value)) = raw.split_once(':') {
            add(name, value);
        }
    }
    for caps in LINE_HEADER_RE.captures_iter(input) {
        if looks_like_header(&caps[1]) {
            add(&caps[1], &caps[2]);
        }
    }
    for caps in QUOTED_HEADER_RE.captures_iter(input) {
        if looks_like_header(&caps[1]) {
            add(&caps[1], &caps[2]);
        }
    }
    headers
}

/// Upper-case HTTP methods in order of first appearance.
pub fn extract_methods(input: &str) -> Vec<String> {
    let mut methods = Vec::new();
    for m in METHOD_RE.find_iter(input) {
        debug_assert!(HTTP_METHODS.contains(&m.as_str()));
        push_unique(&mut methods, m.as_str().to_string());
    }
    methods
}

/// Every balanced `{…}` region that is, or can be repaired into, a JSON object.
pub fn extract_json_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    for (start, end) in json_repair::balanced_regions(input, '{', '}') {
        match json_repair::parse_lenient(&input[start..=end]) {
            Some(value) if value.is_object() => {
                push_unique(&mut blocks, value.to_string());
            }
            _ => tracing::debug!(start, end, "discarding unparseable JSON block"),
        }
    }
    blocks
}

/// Coarse structure of `input`. Empty input yields an empty result.
pub fn extract_structured_data(input: &str) -> StructuredData {
    if input.trim().is_empty() {
        return StructuredData::default();
    }

    let mut key_value_pairs = BTreeMap::new();
    for caps in KEY_VALUE_RE.captures_iter(input) {
        let value = &caps[2];
        // `https://…` is a URL, not a pair.
        if value.starts_with("//") {
            continue;
        }
        key_value_pairs
            .entry(caps[1].trim().to_string())
            .or_insert_with(|| value.to_string());
    }

    StructuredData {
        json_blocks: extract_json_blocks(input),
        urls: extract_urls(input),
        headers: extract_headers(input),
        methods: extract_methods(input),
        key_value_pairs,
    }
}

/// Split input describing several requests into one segment per request.
///
/// Boundaries: horizontal rules (`---`, `***`, `===`), markdown headings,
/// numbered-list items and `Request N:` markers. Empty segments are dropped.
pub fn separate_requests(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        let joined = current.join("\n").trim().to_string();
        if !joined.is_empty() {
            segments.push(joined);
        }
        current.clear();
    };

    for line in input.lines() {
        let trimmed = line.trim();
        if RULE_LINE_RE.is_match(trimmed) || HEADING_RE.is_match(trimmed) {
            flush(&mut current);
        } else if let Some(caps) = REQUEST_MARKER_RE
            .captures(trimmed)
            .or_else(|| NUMBERED_ITEM_RE.captures(trimmed))
        {
            flush(&mut current);
            if let Some(rest) = caps.get(1) {
                current.push(rest.as_str());
            }
        } else {
            current.push(line);
        }
    }
    flush(&mut current);
    segments
}
