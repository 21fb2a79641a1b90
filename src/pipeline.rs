//! End-to-end parse of one free-text load-test command.
//!
//! ```text
//! input ─► preprocess ─► detect ─► context ─► prompt ─► ai_call ─► parse_response ─► validate ─► outcome
//!                                                           │              │              │
//!                                                           │        unparseable          │
//!                                                           │        ─► fallback          │
//!                                                           └─────────── failure ─────────┴─► recover
//!                                                                                             (retry | enhance_prompt | fallback)
//! ```
//!
//! A reply that cannot be parsed is answered by the fallback parser on the
//! spot. Recovery re-prompts only for provider errors and replies that
//! parse but fail validation.
//!
//! Every call records exactly one [`ParseAttempt`] and one
//! [`DiagnosticInfo`] per executed stage in the context's metrics collector.

use crate::{
    config::ParserConfig,
    context::ContextEnhancer,
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    fallback::IntelligentFallbackParser,
    format::{FormatDetector, InputFormat},
    llm_call::AiCall,
    load_test::LoadTestSpec,
    monitoring::{DiagnosticAnalyzer, DiagnosticInfo, ParseAttempt, PerformanceMonitor},
    preprocess::InputPreprocessor,
    prompt::{with_correction, EnhancedPrompt, SmartPromptBuilder},
    recovery::{ErrorLevel, ErrorRecoverySystem, ErrorType, RecoveryContext, StrategyKind},
    response::{ParsedResponse, ResponseParser, VariableTypeRules},
    types::{clamp_confidence, Ambiguity, ParseContext, ParseSource},
    validator::CommandValidator,
    PipelineError,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const STAGE_PREPROCESS: &str = "preprocess";
pub const STAGE_DETECT: &str = "detect";
pub const STAGE_CONTEXT: &str = "context";
pub const STAGE_PROMPT: &str = "prompt";
pub const STAGE_AI_CALL: &str = "ai_call";
pub const STAGE_PARSE_RESPONSE: &str = "parse_response";
pub const STAGE_VALIDATE: &str = "validate";
pub const STAGE_FALLBACK: &str = "fallback";

// Extra recovery candidates offered next to the classified error's own strategy.
const ENHANCE_CANDIDATE_CONFIDENCE: f64 = 0.5;
const RETRY_CANDIDATE_CONFIDENCE: f64 = 0.5;
const FALLBACK_CANDIDATE_CONFIDENCE: f64 = 0.3;

/// A finished parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseOutcome {
    pub spec: LoadTestSpec,
    pub confidence: f64,
    /// Defaults substituted anywhere in the pipeline.
    pub assumptions: Vec<String>,
    pub warnings: Vec<String>,
    pub ambiguities: Vec<Ambiguity>,
    pub suggestions: Vec<String>,
    pub format: InputFormat,
    pub source: ParseSource,
    /// Recovery strategies tried, in order. Empty when the first AI answer
    /// was accepted.
    pub recovery_path: Vec<String>,
    pub attempt_id: Uuid,
    pub diagnostics: Vec<DiagnosticInfo>,
}

/// Parses load-test commands against a shared [`ExecCtx`].
///
/// The parser holds no per-request state; share one instance (or clones of
/// the context) across tasks.
///
/// # Example
///
/// ```
/// use loadtest_parser::{backend::MockBackend, CommandParser, ExecCtx};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let reply = r#"{"name": "Users", "requests": [{"method": "GET", "url": "https://shop.test/users"}],
///                 "loadPattern": {"type": "constant", "virtualUsers": 20}}"#;
/// let ctx = ExecCtx::builder("http://localhost:11434")
///     .backend(Arc::new(MockBackend::fixed(reply)))
///     .build();
/// let parser = CommandParser::new(ctx);
///
/// let outcome = parser.parse("GET https://shop.test/users with 20 users").await.unwrap();
/// assert_eq!(outcome.spec.requests[0].url, "https://shop.test/users");
/// # });
/// ```
#[derive(Debug)]
pub struct CommandParser {
    ctx: ExecCtx,
    prompts: SmartPromptBuilder,
    responses: ResponseParser,
    fallback: IntelligentFallbackParser,
    validator: CommandValidator,
}

impl CommandParser {
    pub fn new(ctx: ExecCtx) -> Self {
        Self {
            ctx,
            prompts: SmartPromptBuilder::default(),
            responses: ResponseParser::default(),
            fallback: IntelligentFallbackParser::default(),
            validator: CommandValidator,
        }
    }

    /// Replace the variable-type inference table used by both the response
    /// parser and the fallback parser.
    pub fn with_variable_rules(mut self, rules: VariableTypeRules) -> Self {
        self.fallback = IntelligentFallbackParser::new(rules.clone());
        self.responses = ResponseParser::new(rules);
        self
    }

    pub fn with_prompt_builder(mut self, prompts: SmartPromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn ctx(&self) -> &ExecCtx {
        &self.ctx
    }

    /// An analyzer over this parser's metrics and configuration.
    pub fn analyzer(&self) -> DiagnosticAnalyzer {
        DiagnosticAnalyzer::new(Arc::clone(&self.ctx.metrics), Arc::clone(&self.ctx.config))
    }

    /// Parse one command.
    ///
    /// Fails only with [`PipelineError::Cancelled`],
    /// [`PipelineError::InvalidConfig`], or [`PipelineError::Exhausted`]
    /// once every recovery strategy has failed.
    pub async fn parse(&self, input: &str) -> Result<ParseOutcome> {
        let config = self.ctx.config.get_config();
        self.ctx.metrics.apply_config(&config.monitoring);

        let attempt_id = Uuid::new_v4();
        let tracker = Tracker::new(&self.ctx, attempt_id);
        tracing::debug!(attempt_id = %attempt_id, input_length = input.len(), "parse started");

        let result = self.execute(&tracker, input, &config).await;

        let state = tracker.finish();
        let latency_ms = state.monitor.elapsed_ms();
        let diagnostics = state.monitor.into_diagnostics();

        let mut attempt = ParseAttempt {
            id: attempt_id,
            timestamp: Utc::now(),
            input_length: input.chars().count(),
            format: state.format,
            format_confidence: state.format_confidence,
            confidence: 0.0,
            success: false,
            source: None,
            error_type: state.error_type,
            retry_count: state.retry_count,
            assumption_count: 0,
            warning_count: 0,
            latency_ms,
            recovery_path: state.recovery_path,
        };
        match &result {
            Ok(outcome) => {
                attempt.confidence = outcome.confidence;
                attempt.success = true;
                attempt.source = Some(outcome.source);
                attempt.assumption_count = outcome.assumptions.len();
                attempt.warning_count = outcome.warnings.len();
                tracing::info!(
                    attempt_id = %attempt_id,
                    source = outcome.source.as_str(),
                    confidence = outcome.confidence,
                    latency_ms,
                    "parse complete"
                );
            }
            Err(e) => {
                if let Some(parse_error) = e.parse_error() {
                    attempt.error_type = Some(parse_error.error_type);
                }
                tracing::warn!(attempt_id = %attempt_id, error = %e, latency_ms, "parse failed");
            }
        }

        emit(
            &self.ctx.event_handler,
            Event::ParseComplete {
                attempt_id: attempt_id.to_string(),
                success: attempt.success,
                confidence: attempt.confidence,
                source: attempt.source.map(|s| s.as_str().to_string()).unwrap_or_default(),
            },
        );
        self.ctx.metrics.record_attempt(attempt);
        self.ctx.metrics.record_diagnostics(diagnostics.clone());

        result.map(|mut outcome| {
            outcome.diagnostics = diagnostics;
            outcome
        })
    }

    /// Parse independent commands concurrently. Results keep input order.
    pub async fn parse_many<I, S>(&self, inputs: I) -> Vec<Result<ParseOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parses = inputs
            .into_iter()
            .map(|input| async move { self.parse(input.as_ref()).await });
        futures::future::join_all(parses).await
    }

    async fn execute(&self, tracker: &Tracker<'_>, input: &str, config: &ParserConfig) -> Result<ParseOutcome> {
        tracker.check()?;
        tracker.start(STAGE_PREPROCESS);
        let pre = InputPreprocessor::new(config.preprocessing.clone()).process(input);
        tracker.end(STAGE_PREPROCESS, None);
        tracker.annotate(STAGE_PREPROCESS, "truncated", pre.truncated);
        tracker.annotate(STAGE_PREPROCESS, "segments", pre.segments.len());

        tracker.check()?;
        tracker.start(STAGE_DETECT);
        let detection = FormatDetector::new(&config.format_detection).detect_format(&pre.cleaned);
        tracker.end(STAGE_DETECT, None);
        tracker.annotate(STAGE_DETECT, "format", detection.format.as_str());
        tracker.annotate(STAGE_DETECT, "confidence", detection.confidence);
        tracker.record_format(detection.format, detection.confidence);

        tracker.check()?;
        tracker.start(STAGE_CONTEXT);
        let pctx = ContextEnhancer::new(config.context_enhancement.clone()).enhance(
            input,
            &pre.cleaned,
            &pre.structured,
            &detection.hints,
        );
        tracker.end(STAGE_CONTEXT, None);
        tracker.annotate(STAGE_CONTEXT, "ambiguities", pctx.ambiguities.len());

        let mut warnings = Vec::new();
        if pre.truncated {
            warnings.push(format!(
                "input truncated to {} characters",
                config.preprocessing.max_input_length
            ));
        }
        if detection.confidence < config.format_detection.confidence_threshold {
            warnings.push(format!(
                "input format detected as {} with low confidence {:.2}",
                detection.format.as_str(),
                detection.confidence
            ));
        }

        let (candidate, recovery_path) = self.resolve(tracker, &pctx, config).await?;

        let mut assumptions = pctx.assumptions.clone();
        for assumption in candidate.parsed.assumptions {
            if !assumptions.contains(&assumption) {
                assumptions.push(assumption);
            }
        }
        warnings.extend(candidate.warnings);

        Ok(ParseOutcome {
            spec: candidate.parsed.spec,
            confidence: clamp_confidence(candidate.parsed.confidence),
            assumptions,
            warnings,
            ambiguities: candidate.parsed.ambiguities,
            suggestions: candidate.parsed.suggestions,
            format: detection.format,
            source: candidate.source,
            recovery_path,
            attempt_id: tracker.attempt_id,
            diagnostics: Vec::new(),
        })
    }

    /// First AI attempt, or the fallback when the AI path is off. Failures
    /// go to recovery.
    async fn resolve(
        &self,
        tracker: &Tracker<'_>,
        pctx: &ParseContext,
        config: &ParserConfig,
    ) -> Result<(Candidate, Vec<String>)> {
        if pctx.cleaned_input.is_empty() {
            return self
                .recover(tracker, pctx, config, None, ErrorLevel::Input, "missing input: nothing to parse".into())
                .await;
        }

        if !self.ctx.ai_enabled() {
            if !config.fallback.enable_smart_fallback {
                return Err(PipelineError::InvalidConfig(
                    "no AI provider configured and fallback.enableSmartFallback is false".into(),
                ));
            }
            return match self.run_fallback(tracker, pctx, config, "AI provider disabled") {
                Ok(candidate) => Ok((candidate, Vec::new())),
                Err(Failure::Fatal(e)) => Err(e),
                Err(failure) => Err(PipelineError::Other(failure.to_string())),
            };
        }

        tracker.check()?;
        tracker.start(STAGE_PROMPT);
        let prompt = self.prompts.build_prompt(pctx);
        tracker.end(STAGE_PROMPT, None);
        tracker.annotate(STAGE_PROMPT, "examples", prompt.contextual_examples.len());

        let call = AiCall::from_config(self.ctx.model.clone(), &config.ai_provider);
        match self.attempt_ai(tracker, &call, &prompt, pctx, 0, config).await {
            Ok(candidate) => Ok((candidate, Vec::new())),
            Err(Failure::Fatal(e)) => Err(e),
            Err(Failure::Recoverable { level, message }) => {
                self.recover(tracker, pctx, config, Some((&call, &prompt)), level, message)
                    .await
            }
        }
    }

    async fn recover(
        &self,
        tracker: &Tracker<'_>,
        pctx: &ParseContext,
        config: &ParserConfig,
        ai: Option<(&AiCall, &EnhancedPrompt)>,
        level: ErrorLevel,
        message: String,
    ) -> Result<(Candidate, Vec<String>)> {
        let system = ErrorRecoverySystem::from_config(config);
        let context = json!({
            "attemptId": tracker.id,
            "format": tracker.format().as_str(),
        });
        let error = system.classify_error(&message, level, Some(context));
        let error_type = error.error_type;
        tracker.record_error(error_type, &message);
        tracing::info!(
            attempt_id = %tracker.id,
            error_type = %error_type,
            strategy = %error.recovery_strategy.strategy,
            "recovering from parse failure"
        );

        let factory = system.factory();
        let mut candidates = vec![factory.create_fallback_strategy(FALLBACK_CANDIDATE_CONFIDENCE)];
        if ai.is_some() {
            candidates.push(factory.create_prompt_enhancement_strategy(ENHANCE_CANDIDATE_CONFIDENCE));
            candidates.push(factory.create_retry_strategy(RETRY_CANDIDATE_CONFIDENCE, 1));
        }
        let rctx = RecoveryContext::new(pctx.original_input.clone()).with_strategies(candidates);

        let enhancements = AtomicU32::new(0);
        let fallbacks = AtomicU32::new(0);
        let (enhancements, fallbacks) = (&enhancements, &fallbacks);
        let max_fallbacks = config.fallback.max_fallback_attempts;

        let result = system
            .recover(&error, &rctx, |strategy, attempt_ctx| async move {
                emit(
                    &self.ctx.event_handler,
                    Event::RecoveryAttempt {
                        attempt_id: tracker.id.clone(),
                        strategy: strategy.strategy.as_str().to_string(),
                        attempt: attempt_ctx.attempt,
                        error_type: error_type.as_str().to_string(),
                    },
                );
                let last_error = attempt_ctx.last_error.as_deref().unwrap_or("unknown error");
                let outcome = match (strategy.strategy, ai) {
                    (StrategyKind::Fallback, _) => {
                        if fallbacks.fetch_add(1, Ordering::Relaxed) >= max_fallbacks {
                            Err(Failure::recoverable(
                                ErrorLevel::Input,
                                format!("fallback limit of {} reached", max_fallbacks),
                            ))
                        } else {
                            self.run_fallback(tracker, pctx, config, last_error)
                        }
                    }
                    (StrategyKind::Retry, Some((call, prompt))) => {
                        let cooled = enhancements.load(Ordering::Relaxed);
                        self.attempt_ai(tracker, call, prompt, pctx, cooled, config)
                            .await
                            .map(Candidate::recovered)
                    }
                    (StrategyKind::EnhancePrompt, Some((call, prompt))) => {
                        let cooled = enhancements.fetch_add(1, Ordering::Relaxed) + 1;
                        let corrected = with_correction(prompt.clone(), last_error);
                        self.attempt_ai(tracker, call, &corrected, pctx, cooled, config)
                            .await
                            .map(Candidate::recovered)
                    }
                    (kind, None) => Err(Failure::recoverable(
                        ErrorLevel::Ai,
                        format!("{} needs an AI provider", kind),
                    )),
                };
                outcome.map_err(|failure| {
                    let message = failure.to_string();
                    tracker.record_failure(&message);
                    anyhow::anyhow!(message)
                })
            })
            .await;

        tracker.record_recovery(result.attempts_used, &result.recovery_path);
        system.release(&error);

        match result.result {
            Some(candidate) if result.success => Ok((candidate, result.recovery_path)),
            _ => {
                if self.ctx.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let mut error = result.error.unwrap_or(error);
                if let Some(last) = tracker.last_failure() {
                    error = error.with_original_error(last);
                }
                Err(PipelineError::Exhausted {
                    error: Box::new(error),
                    recovery_path: result.recovery_path,
                })
            }
        }
    }

    async fn attempt_ai(
        &self,
        tracker: &Tracker<'_>,
        call: &AiCall,
        prompt: &EnhancedPrompt,
        pctx: &ParseContext,
        enhancements: u32,
        config: &ParserConfig,
    ) -> std::result::Result<Candidate, Failure> {
        tracker.check()?;
        tracker.start(STAGE_AI_CALL);
        let request = call.build_request(prompt, &pctx.cleaned_input, enhancements);
        let output = match call.execute(&self.ctx, &request, &tracker.id).await {
            Ok(output) => {
                tracker.end(STAGE_AI_CALL, None);
                output
            }
            Err(e) => {
                tracker.end(STAGE_AI_CALL, Some(e.to_string()));
                return Err(match e {
                    PipelineError::Cancelled => Failure::Fatal(e),
                    other => Failure::recoverable(ErrorLevel::Ai, other.to_string()),
                });
            }
        };
        tracker.annotate(STAGE_AI_CALL, "temperature", request.temperature);
        tracker.annotate(STAGE_AI_CALL, "transportRetries", output.transport_retries);
        tracker.annotate(STAGE_AI_CALL, "backoffMs", output.backoff_total_ms);

        tracker.check()?;
        tracker.start(STAGE_PARSE_RESPONSE);
        let parsed = self.responses.parse_response(&output.response.text, pctx);
        if let Some(error) = parsed.parse_error.as_deref() {
            let message = invalid_response_message(error);
            tracker.end(STAGE_PARSE_RESPONSE, Some(message.clone()));
            if !config.fallback.enable_smart_fallback {
                return Err(Failure::recoverable(ErrorLevel::Ai, message));
            }
            tracker.annotate(STAGE_PARSE_RESPONSE, "usedFallback", true);
            tracker.record_error(ErrorType::InvalidAiResponse, &message);
            return self.accept_fallback(tracker, parsed, config, &message);
        }
        tracker.end(STAGE_PARSE_RESPONSE, None);

        let (parsed, warnings) = self.validate(tracker, parsed, config, true)?;
        Ok(Candidate {
            parsed,
            warnings,
            source: ParseSource::Ai,
        })
    }

    fn run_fallback(
        &self,
        tracker: &Tracker<'_>,
        pctx: &ParseContext,
        config: &ParserConfig,
        reason: &str,
    ) -> std::result::Result<Candidate, Failure> {
        tracker.check()?;
        tracker.start(STAGE_FALLBACK);
        let result = self.fallback.parse(&pctx.cleaned_input);
        tracker.end(STAGE_FALLBACK, None);

        let ambiguities = self.responses.find_ambiguities(&result.spec, pctx);
        let suggestions = self.responses.suggestions(&result.spec, &ambiguities, true);
        let parsed = ParsedResponse {
            spec: result.spec,
            confidence: result.confidence,
            assumptions: result.assumptions,
            ambiguities,
            suggestions,
            used_fallback: true,
            parse_error: None,
        };
        self.accept_fallback(tracker, parsed, config, reason)
    }

    /// Deterministic results skip the confidence floor.
    fn accept_fallback(
        &self,
        tracker: &Tracker<'_>,
        parsed: ParsedResponse,
        config: &ParserConfig,
        reason: &str,
    ) -> std::result::Result<Candidate, Failure> {
        emit(
            &self.ctx.event_handler,
            Event::FallbackUsed {
                attempt_id: tracker.id.clone(),
                reason: reason.to_string(),
            },
        );
        let (parsed, warnings) = self.validate(tracker, parsed, config, false)?;
        Ok(Candidate {
            parsed,
            warnings,
            source: ParseSource::Fallback,
        })
    }

    /// Structural validation, plus the `fallbackConfidenceThreshold` floor
    /// for AI results.
    fn validate(
        &self,
        tracker: &Tracker<'_>,
        parsed: ParsedResponse,
        config: &ParserConfig,
        enforce_threshold: bool,
    ) -> std::result::Result<(ParsedResponse, Vec<String>), Failure> {
        tracker.check()?;
        tracker.start(STAGE_VALIDATE);
        let report = self.validator.validate(&parsed.spec);
        let threshold = config.fallback.fallback_confidence_threshold;
        let failure = if !report.is_valid() {
            Some(format!("schema validation failed: {}", report.errors.join("; ")))
        } else if enforce_threshold && parsed.confidence < threshold {
            Some(format!(
                "schema validation failed: confidence {:.2} is below the required {:.2}",
                parsed.confidence, threshold
            ))
        } else {
            None
        };
        tracker.end(STAGE_VALIDATE, failure.clone());
        tracker.annotate(STAGE_VALIDATE, "warnings", report.warnings.len());
        match failure {
            Some(message) => Err(Failure::recoverable(ErrorLevel::Validation, message)),
            None => Ok((parsed, report.warnings)),
        }
    }
}

fn invalid_response_message(text: &str) -> String {
    if text.to_lowercase().starts_with("invalid ai response") {
        text.to_string()
    } else {
        format!("invalid AI response: {}", text)
    }
}

/// A usable result from one path through the pipeline.
#[derive(Debug)]
struct Candidate {
    parsed: ParsedResponse,
    warnings: Vec<String>,
    source: ParseSource,
}

impl Candidate {
    /// AI answers reached through recovery. Fallback answers keep their source.
    fn recovered(mut self) -> Self {
        if self.source == ParseSource::Ai {
            self.source = ParseSource::Recovered;
        }
        self
    }
}

/// Why a stage gave up.
#[derive(Debug)]
enum Failure {
    /// Stops the parse outright.
    Fatal(PipelineError),
    /// Classified and handed to recovery.
    Recoverable { level: ErrorLevel, message: String },
}

impl Failure {
    fn recoverable(level: ErrorLevel, message: impl Into<String>) -> Self {
        Failure::Recoverable {
            level,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for Failure {
    fn from(error: PipelineError) -> Self {
        Failure::Fatal(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Fatal(e) => write!(f, "{}", e),
            Failure::Recoverable { message, .. } => f.write_str(message),
        }
    }
}

struct TrackState {
    monitor: PerformanceMonitor,
    format: InputFormat,
    format_confidence: f64,
    error_type: Option<ErrorType>,
    retry_count: u32,
    recovery_path: Vec<String>,
    last_failure: Option<String>,
}

/// Per-call stage bracketing and bookkeeping. Shared by reference with
/// recovery callbacks, so state sits behind a mutex that is never held
/// across an await.
struct Tracker<'a> {
    ctx: &'a ExecCtx,
    attempt_id: Uuid,
    id: String,
    state: Mutex<TrackState>,
}

impl<'a> Tracker<'a> {
    fn new(ctx: &'a ExecCtx, attempt_id: Uuid) -> Self {
        Self {
            ctx,
            attempt_id,
            id: attempt_id.to_string(),
            state: Mutex::new(TrackState {
                monitor: PerformanceMonitor::new(attempt_id),
                format: InputFormat::NaturalLanguage,
                format_confidence: 0.0,
                error_type: None,
                retry_count: 0,
                recovery_path: Vec::new(),
                last_failure: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<()> {
        self.ctx.check_cancelled()
    }

    fn start(&self, stage: &'static str) {
        emit(
            &self.ctx.event_handler,
            Event::StageStart {
                attempt_id: self.id.clone(),
                stage,
            },
        );
        self.state().monitor.start_stage(stage);
    }

    fn end(&self, stage: &'static str, error: Option<String>) {
        let ok = error.is_none();
        let duration_ms = self.state().monitor.end_stage(stage, error).unwrap_or(0);
        emit(
            &self.ctx.event_handler,
            Event::StageEnd {
                attempt_id: self.id.clone(),
                stage,
                ok,
                duration_ms,
            },
        );
    }

    fn annotate(&self, stage: &str, key: &str, value: impl Into<Value>) {
        self.state().monitor.annotate(stage, key, value);
    }

    fn record_format(&self, format: InputFormat, confidence: f64) {
        let mut state = self.state();
        state.format = format;
        state.format_confidence = confidence;
    }

    fn format(&self) -> InputFormat {
        self.state().format
    }

    fn record_error(&self, error_type: ErrorType, message: &str) {
        let mut state = self.state();
        state.error_type = Some(error_type);
        state.last_failure = Some(message.to_string());
    }

    fn record_failure(&self, message: &str) {
        self.state().last_failure = Some(message.to_string());
    }

    fn last_failure(&self) -> Option<String> {
        self.state().last_failure.clone()
    }

    fn record_recovery(&self, attempts: u32, path: &[String]) {
        let mut state = self.state();
        state.retry_count += attempts;
        state.recovery_path.extend_from_slice(path);
    }

    fn finish(self) -> TrackState {
        self.state.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::config::ConfigManager;
    use crate::events::FnEventHandler;
    use crate::validator::DEFAULT_BASE_URL;
    use std::sync::atomic::AtomicBool;

    const ORDER_INPUT: &str = "POST https://shop.test/orders with 50 users for 5 minutes";
    const ORDER_REPLY: &str = r#"{"name": "Order load",
        "requests": [{"method": "POST", "url": "https://shop.test/orders",
                      "payload": {"template": "{\"orderId\": \"{{orderId}}\"}"}}],
        "loadPattern": {"type": "constant", "virtualUsers": 50}}"#;

    const FETCH_REPLY: &str = r#"{"name": "Order load",
        "requests": [{"method": "FETCH", "url": "https://shop.test/orders"}],
        "loadPattern": {"type": "constant", "virtualUsers": 50}}"#;

    fn rate_limited() -> PipelineError {
        PipelineError::HttpError {
            status: 429,
            body: "Rate limit exceeded".into(),
            retry_after: None,
        }
    }

    fn parser(mock: Arc<MockBackend>) -> CommandParser {
        CommandParser::new(ExecCtx::builder("http://unused").backend(mock).build())
    }

    fn recorder() -> (Arc<Mutex<Vec<Event>>>, Arc<FnEventHandler<impl Fn(Event) + Send + Sync>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, Arc::new(FnEventHandler(move |e: Event| sink.lock().unwrap().push(e))))
    }

    #[tokio::test]
    async fn test_first_ai_answer_accepted() {
        let mock = Arc::new(MockBackend::fixed(ORDER_REPLY));
        let parser = parser(mock.clone());
        let outcome = parser.parse(ORDER_INPUT).await.unwrap();

        assert_eq!(outcome.source, ParseSource::Ai);
        assert!(outcome.recovery_path.is_empty());
        assert_eq!(outcome.spec.requests[0].method, "POST");
        assert_eq!(outcome.spec.requests[0].headers["Content-Type"], "application/json");
        assert_eq!(outcome.spec.load_pattern.virtual_users, Some(50));
        assert!(outcome.confidence >= 0.9);
        assert_eq!(mock.calls(), 1);

        let stages: Vec<&str> = outcome.diagnostics.iter().map(|d| d.stage.as_str()).collect();
        assert_eq!(
            stages,
            [
                STAGE_PREPROCESS,
                STAGE_DETECT,
                STAGE_CONTEXT,
                STAGE_PROMPT,
                STAGE_AI_CALL,
                STAGE_PARSE_RESPONSE,
                STAGE_VALIDATE
            ]
        );
        assert!(outcome.diagnostics.iter().all(|d| d.attempt_id == outcome.attempt_id));
    }

    #[tokio::test]
    async fn test_unparseable_reply_answered_by_fallback() {
        let (events, handler) = recorder();
        let mock = Arc::new(MockBackend::fixed("Sorry, I can't help with that."));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock.clone())
            .event_handler(handler)
            .build();
        let parser = CommandParser::new(ctx);
        let outcome = parser.parse(ORDER_INPUT).await.unwrap();

        assert_eq!(mock.calls(), 1);
        assert_eq!(outcome.source, ParseSource::Fallback);
        assert!(outcome.recovery_path.is_empty());
        assert!(outcome.confidence < 0.5);
        assert_eq!(outcome.spec.requests[0].method, "POST");
        assert_eq!(outcome.spec.requests[0].url, "https://shop.test/orders");

        let parse_stage = outcome
            .diagnostics
            .iter()
            .find(|d| d.stage == STAGE_PARSE_RESPONSE)
            .unwrap();
        assert!(!parse_stage.success);
        assert!(events.lock().unwrap().iter().any(|e| matches!(e, Event::FallbackUsed { .. })));

        let attempt = parser.ctx().metrics.attempt(outcome.attempt_id).unwrap();
        assert!(attempt.success);
        assert_eq!(attempt.error_type, Some(ErrorType::InvalidAiResponse));
        assert_eq!(attempt.retry_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_spec_recovered_with_enhanced_prompt() {
        let mock = Arc::new(MockBackend::new(vec![FETCH_REPLY.into(), ORDER_REPLY.into()]));
        let parser = parser(mock.clone());
        let outcome = parser.parse(ORDER_INPUT).await.unwrap();

        assert_eq!(outcome.source, ParseSource::Recovered);
        assert_eq!(outcome.recovery_path, ["enhance_prompt"]);
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].prompt.contains("previous response was invalid"));
        assert!(requests[1].prompt.contains("FETCH"));
        assert!(requests[1].temperature < requests[0].temperature);

        let attempt = parser.ctx().metrics.attempt(outcome.attempt_id).unwrap();
        assert_eq!(attempt.error_type, Some(ErrorType::SchemaValidationError));
        assert_eq!(attempt.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_after_delay() {
        let mock = Arc::new(MockBackend::scripted(vec![Err(rate_limited()), Ok(ORDER_REPLY.into())]));
        let parser = parser(mock.clone());
        let started = tokio::time::Instant::now();
        let outcome = parser.parse(ORDER_INPUT).await.unwrap();

        assert_eq!(outcome.recovery_path, ["retry"]);
        assert_eq!(outcome.source, ParseSource::Recovered);
        assert!(started.elapsed() >= std::time::Duration::from_secs(1));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_offline_uses_fallback_directly() {
        let (events, handler) = recorder();
        let ctx = ExecCtx::builder("http://unused").without_ai().event_handler(handler).build();
        let parser = CommandParser::new(ctx);
        let outcome = parser
            .parse(r#"curl -X POST https://api.test.com/users -d '{"name":"a"}'"#)
            .await
            .unwrap();

        assert_eq!(outcome.source, ParseSource::Fallback);
        assert!(outcome.confidence < 0.5);
        assert!(outcome.recovery_path.is_empty());
        assert_eq!(outcome.spec.requests[0].method, "POST");
        assert!(!outcome.assumptions.is_empty());

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::FallbackUsed { .. })));
        assert!(matches!(
            events.last(),
            Some(Event::ParseComplete { success: true, source, .. }) if source == "fallback"
        ));
    }

    #[tokio::test]
    async fn test_offline_without_fallback_is_config_error() {
        let config = Arc::new(ConfigManager::from_json_str(r#"{"fallback": {"enableSmartFallback": false}}"#).unwrap());
        let ctx = ExecCtx::builder("http://unused").without_ai().config(config).build();
        let err = CommandParser::new(ctx).parse("GET /health").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_empty_input_degrades_to_fallback() {
        let mock = Arc::new(MockBackend::fixed(ORDER_REPLY));
        let outcome = parser(mock.clone()).parse("   ").await.unwrap();
        assert_eq!(outcome.source, ParseSource::Fallback);
        assert_eq!(outcome.recovery_path, ["fallback"]);
        assert_eq!(outcome.spec.requests[0].url, DEFAULT_BASE_URL);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_replies_without_fallback_exhaust_recovery() {
        let config = Arc::new(ConfigManager::default());
        config
            .update_config(&json!({"fallback": {"enableSmartFallback": false}}))
            .unwrap();
        let mock = Arc::new(MockBackend::fixed("no json here"));
        let ctx = ExecCtx::builder("http://unused").backend(mock.clone()).config(config).build();
        let parser = CommandParser::new(ctx);

        let err = parser.parse(ORDER_INPUT).await.unwrap_err();
        let PipelineError::Exhausted { error, recovery_path } = &err else {
            panic!("expected exhaustion, got {:?}", err);
        };
        assert_eq!(error.error_type, ErrorType::InvalidAiResponse);
        assert!(error.original_error.is_some());
        assert!(recovery_path.iter().any(|s| s == "enhance_prompt"));
        assert!(!recovery_path.iter().any(|s| s == "fallback"));
        // First call plus at most maxRetries + 1 recovery invocations.
        assert!(mock.calls() <= 5);

        let attempts = parser.ctx().metrics.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].confidence, 0.0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let flag = Arc::new(AtomicBool::new(true));
        let mock = Arc::new(MockBackend::fixed(ORDER_REPLY));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock.clone())
            .cancellation(Some(flag))
            .build();
        let parser = CommandParser::new(ctx);
        let err = parser.parse(ORDER_INPUT).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(mock.calls(), 0);
        assert_eq!(parser.ctx().metrics.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_many_records_one_attempt_each() {
        let mock = Arc::new(MockBackend::fixed(ORDER_REPLY));
        let parser = parser(mock);
        let results = parser.parse_many([ORDER_INPUT, "GET https://shop.test/orders", ORDER_INPUT]).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));

        let attempts = parser.ctx().metrics.attempts();
        assert_eq!(attempts.len(), 3);
        let mut ids: Vec<Uuid> = attempts.iter().map(|a| a.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        let summary = parser.ctx().metrics.summary();
        assert_eq!(summary.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_stage_events_bracket_the_parse() {
        let (events, handler) = recorder();
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed(ORDER_REPLY)))
            .event_handler(handler)
            .build();
        CommandParser::new(ctx).parse(ORDER_INPUT).await.unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(&events[0], Event::StageStart { stage, .. } if *stage == STAGE_PREPROCESS));
        let starts = events.iter().filter(|e| matches!(e, Event::StageStart { .. })).count();
        let ends = events.iter().filter(|e| matches!(e, Event::StageEnd { .. })).count();
        assert_eq!(starts, ends);
        assert!(matches!(
            events.last(),
            Some(Event::ParseComplete { success: true, source, .. }) if source == "ai"
        ));
    }

    #[tokio::test]
    async fn test_analyzer_sees_recorded_attempts() {
        let parser = parser(Arc::new(MockBackend::fixed(ORDER_REPLY)));
        parser.parse(ORDER_INPUT).await.unwrap();
        let export = parser.analyzer().export_diagnostic_data();
        assert_eq!(export.attempts.len(), 1);
    }
}
