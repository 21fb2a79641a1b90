//! Provider-agnostic prompt construction.
//!
//! [`SmartPromptBuilder`] turns a [`ParseContext`] into an [`EnhancedPrompt`]:
//! a system prompt (base instructions, format fragment, caveats), a handful
//! of scored few-shot examples, clarifications for every ambiguity, and
//! parsing/fallback instructions.

pub mod library;

pub use library::{example_library, PromptExample};

use crate::format::InputFormat;
use crate::types::ParseContext;
use serde::Serialize;
use std::collections::BTreeSet;

const MAX_EXAMPLES: usize = 5;
const MAX_PER_RULE: usize = 2;

const BASE_INSTRUCTIONS: &str = "You convert descriptions of HTTP load tests into a JSON load-test specification.
Respond with a single JSON object and nothing else. Use this shape:
{
  \"name\": string,
  \"description\": string,
  \"testType\": \"load\" | \"stress\" | \"spike\" | \"endurance\" | \"volume\" | \"baseline\",
  \"requests\": [{
    \"method\": \"GET\" | \"POST\" | \"PUT\" | \"DELETE\" | \"PATCH\" | \"HEAD\" | \"OPTIONS\",
    \"url\": string,
    \"headers\": {string: string},
    \"payload\": {\"template\": string, \"variables\": [{\"name\": string, \"type\": \"string\" | \"number\" | \"uuid\" | \"timestamp\" | \"random_id\" | \"sequence\"}]}
  }],
  \"loadPattern\": {\"type\": \"constant\" | \"ramp\" | \"spike\" | \"step\" | \"random\", \"virtualUsers\": number, \"requestsPerSecond\": number},
  \"duration\": {\"value\": number, \"unit\": \"seconds\" | \"minutes\" | \"hours\"}
}
Use {{name}} placeholders for values that must vary per request.";

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A prompt ready to hand to any [`Backend`](crate::backend::Backend).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedPrompt {
    pub system_prompt: String,
    pub contextual_examples: Vec<PromptExample>,
    pub clarifications: Vec<String>,
    pub parsing_instructions: Vec<String>,
    pub fallback_instructions: Vec<String>,
}

impl EnhancedPrompt {
    /// Render the user-turn prompt around `input`. Empty parts are omitted.
    pub fn user_prompt(&self, input: &str) -> String {
        let mut parts = Vec::new();
        if !self.contextual_examples.is_empty() {
            let examples = self
                .contextual_examples
                .iter()
                .map(|ex| format!("Input: {}\nOutput: {}", ex.input, ex.output))
                .collect::<Vec<_>>()
                .join("\n\n");
            parts.push(section("Examples", &examples));
        }
        if !self.clarifications.is_empty() {
            parts.push(section("Clarifications", &numbered_list(&self.clarifications)));
        }
        if !self.parsing_instructions.is_empty() {
            parts.push(section("Parsing instructions", &numbered_list(&self.parsing_instructions)));
        }
        if !self.fallback_instructions.is_empty() {
            parts.push(section("When information is missing", &numbered_list(&self.fallback_instructions)));
        }
        parts.push(section("Input", input));
        parts.join("\n\n")
    }
}

/// Append a correction for the previous failed attempt.
pub fn with_correction(mut prompt: EnhancedPrompt, error: &str) -> EnhancedPrompt {
    prompt.fallback_instructions.push(format!(
        "Your previous response was invalid: {}. Return a single valid JSON object matching the shape above.",
        error
    ));
    prompt
}

/// Re-derive the input format from the context alone.
pub fn likely_format(ctx: &ParseContext) -> InputFormat {
    let text = ctx.cleaned_input.to_lowercase();
    let components = &ctx.extracted_components;
    if text.contains("curl ") {
        InputFormat::CurlCommand
    } else if text.contains(" http/1") || text.contains(" http/2") {
        InputFormat::HttpRaw
    } else if components.urls.len() >= 2 && components.methods.len() >= 2 {
        InputFormat::ConcatenatedRequests
    } else if !components.bodies.is_empty() {
        InputFormat::JsonWithText
    } else {
        InputFormat::NaturalLanguage
    }
}

fn format_fragment(format: InputFormat) -> &'static str {
    match format {
        InputFormat::CurlCommand => {
            "The input is a curl command. -X is the method, -H flags are headers, -d/--data is the payload template."
        }
        InputFormat::HttpRaw => {
            "The input is a raw HTTP request. The request line gives method and path; combine the path with the Host header for the URL."
        }
        InputFormat::JsonWithText | InputFormat::MixedStructured => {
            "The input mixes prose with JSON. Treat embedded JSON as the request payload and the prose as test parameters."
        }
        InputFormat::ConcatenatedRequests => {
            "The input describes several requests. Emit one entry in requests per request, in order, and add a workflow."
        }
        InputFormat::NaturalLanguage => {
            "The input is natural language. Extract the endpoint, method, and load parameters it describes."
        }
    }
}

fn tokens(url: &str) -> BTreeSet<String> {
    url.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 2 && !matches!(*t, "http" | "https" | "www" | "com" | "api"))
        .map(str::to_lowercase)
        .collect()
}

/// Relevance of one example to the context, in `[0, 1]`.
pub fn score_example(example: &PromptExample, ctx: &ParseContext) -> f64 {
    let components = &ctx.extracted_components;
    let inferred = &ctx.inferred_fields;
    let mut score = 0.0;
    if components.methods.iter().any(|m| *m == example.method) {
        score += 0.3;
    }
    if inferred.test_type == Some(example.test_type) {
        score += 0.3;
    }
    if inferred.load_pattern == Some(example.load_pattern) {
        score += 0.2;
    }
    let example_tokens = tokens(&example.url);
    if !example_tokens.is_empty() {
        let ctx_tokens: BTreeSet<String> = components.urls.iter().flat_map(|u| tokens(u)).collect();
        let overlap = example_tokens.intersection(&ctx_tokens).count();
        score += 0.2 * overlap as f64 / example_tokens.len() as f64;
    }
    score
}

type SelectionRule = fn(&PromptExample, &ParseContext, InputFormat) -> bool;

/// Builds [`EnhancedPrompt`]s from a fixed example library.
#[derive(Debug, Clone)]
pub struct SmartPromptBuilder {
    library: Vec<PromptExample>,
}

impl Default for SmartPromptBuilder {
    fn default() -> Self {
        Self::new(example_library())
    }
}

impl SmartPromptBuilder {
    pub fn new(library: Vec<PromptExample>) -> Self {
        Self { library }
    }

    pub fn build_prompt(&self, ctx: &ParseContext) -> EnhancedPrompt {
        let format = likely_format(ctx);
        let mut system = vec![BASE_INSTRUCTIONS.to_string(), format_fragment(format).to_string()];
        if ctx.confidence < 0.5 {
            system.push(
                "Confidence in the extracted details is low. Prefer conservative defaults and say which values you assumed in the description."
                    .to_string(),
            );
        }
        if !ctx.ambiguities.is_empty() {
            system.push(
                "Some fields are ambiguous. Pick the most likely candidate listed under Clarifications rather than leaving fields empty."
                    .to_string(),
            );
        }

        EnhancedPrompt {
            system_prompt: system.join("\n\n"),
            contextual_examples: self.select_relevant_examples(ctx),
            clarifications: self.add_clarifications(ctx),
            parsing_instructions: parsing_instructions(ctx),
            fallback_instructions: fallback_instructions(),
        }
    }

    /// Pick up to five examples: at most two per selection rule, rules in
    /// priority order (format, test type, method, catch-all), best score
    /// first within a rule, never the same input twice.
    pub fn select_relevant_examples(&self, ctx: &ParseContext) -> Vec<PromptExample> {
        let format = likely_format(ctx);
        let rules: [SelectionRule; 4] = [
            |ex, _, format| ex.format == format,
            |ex, ctx, _| ctx.inferred_fields.test_type == Some(ex.test_type),
            |ex, ctx, _| ctx.extracted_components.methods.contains(&ex.method),
            |_, _, _| true,
        ];

        let mut selected: Vec<PromptExample> = Vec::new();
        for rule in rules {
            let mut matching: Vec<(f64, &PromptExample)> = self
                .library
                .iter()
                .filter(|ex| rule(ex, ctx, format))
                .filter(|ex| selected.iter().all(|s| s.input != ex.input))
                .map(|ex| (score_example(ex, ctx), ex))
                .collect();
            matching.sort_by(|a, b| b.0.total_cmp(&a.0));

            for (_, ex) in matching.into_iter().take(MAX_PER_RULE) {
                if selected.len() == MAX_EXAMPLES {
                    return selected;
                }
                selected.push(ex.clone());
            }
        }
        selected
    }

    /// One sentence per ambiguity, format notes, and a generic caveat when
    /// confidence is below 0.6.
    pub fn add_clarifications(&self, ctx: &ParseContext) -> Vec<String> {
        let mut notes: Vec<String> = ctx
            .ambiguities
            .iter()
            .map(|a| {
                let options = a.possible_values.join(", ");
                match a.field.as_str() {
                    "method" => format!("The HTTP method is unclear ({}). Choose from: {}.", a.reason, options),
                    "url" => format!("The target URL is unclear ({}). Candidates: {}.", a.reason, options),
                    "userCount" => format!(
                        "The number of virtual users is unclear ({}). Reasonable values: {}.",
                        a.reason, options
                    ),
                    "authentication" => format!(
                        "{}. Add a placeholder header such as {} using a {{{{token}}}} variable.",
                        a.reason, options
                    ),
                    "contentType" => format!("{}. Use Content-Type: {}.", a.reason, options),
                    other => format!("The field '{}' is ambiguous ({}). Options: {}.", other, a.reason, options),
                }
            })
            .collect();

        match likely_format(ctx) {
            InputFormat::CurlCommand => notes.push("Quoted -d payloads keep their exact JSON structure.".to_string()),
            InputFormat::HttpRaw => notes.push("Default to https when the scheme is not given.".to_string()),
            InputFormat::ConcatenatedRequests => {
                notes.push("Keep the requests in the order they appear in the input.".to_string())
            }
            _ => {}
        }

        if ctx.confidence < 0.6 {
            notes.push(
                "The input is ambiguous or incomplete; fill gaps with sensible defaults instead of failing.".to_string(),
            );
        }
        notes
    }
}

fn parsing_instructions(ctx: &ParseContext) -> Vec<String> {
    let components = &ctx.extracted_components;
    let inferred = &ctx.inferred_fields;
    let mut out = Vec::new();
    if !components.methods.is_empty() {
        out.push(format!("Detected HTTP method(s): {}.", components.methods.join(", ")));
    }
    if !components.urls.is_empty() {
        out.push(format!("Detected URL(s): {}.", components.urls.join(", ")));
    }
    if !components.headers.is_empty() {
        let headers = components
            .headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        out.push(format!("Include these headers: {}.", headers));
    }
    if let Some(body) = components.bodies.first() {
        out.push(format!("Use this JSON as the payload template: {}", body));
    }
    if let Some(count) = components.counts.first() {
        out.push(format!("Use {} virtual users.", count));
    }
    if let Some(test_type) = inferred.test_type {
        out.push(format!("Test type: {}.", test_type));
    }
    if let Some(duration) = inferred.duration {
        out.push(format!("Duration: {}.", duration));
    }
    if let Some(pattern) = inferred.load_pattern {
        out.push(format!("Load pattern: {}.", pattern));
    }
    out
}

fn fallback_instructions() -> Vec<String> {
    [
        "If no method is given, use GET.",
        "If no URL is given, use https://api.example.com.",
        "If no user count is given, use 10 virtual users.",
        "If no duration is given, use 30 seconds.",
        "Never invent real credentials; use {{token}} placeholders.",
    ]
    .map(String::from)
    .to_vec()
}
