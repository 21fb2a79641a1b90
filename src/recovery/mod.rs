//! Failure classification and confidence-ranked recovery.
//!
//! A failure is first classified into a [`ParseError`] (level × type) with
//! a default [`RecoveryStrategy`]. [`ErrorRecoverySystem::recover`] then
//! tries that strategy together with any extra candidates from the
//! [`RecoveryContext`], highest confidence first, until one succeeds, the
//! candidates run out, or the per-error attempt ceiling is hit.

pub mod classify;
pub mod machine;
pub mod strategy;

pub use classify::{classify, classify_error, ErrorLevel, ErrorType, CLASSIFICATION_RULES};
pub use machine::{MachineInput, RecoveryMachine, RecoveryState, DEADLINE_EXCEEDED, MAX_RETRIES_EXCEEDED};
pub use strategy::{RecoveryStrategy, StrategyFactory, StrategyKind};

use crate::config::ParserConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A classified failure.
///
/// `id` identifies this instance; the attempt ceiling is tracked per id.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{error_type}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
    pub id: Uuid,
    pub level: ErrorLevel,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    pub suggestions: Vec<String>,
    pub recovery_strategy: RecoveryStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
}

impl ParseError {
    pub fn new(
        level: ErrorLevel,
        error_type: ErrorType,
        message: impl Into<String>,
        recovery_strategy: RecoveryStrategy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            error_type,
            message: message.into(),
            suggestions: error_type.suggestions().iter().map(|s| s.to_string()).collect(),
            recovery_strategy,
            context: None,
            original_error: None,
        }
    }

    pub fn with_context(mut self, context: Option<Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_original_error(mut self, original: impl Into<String>) -> Self {
        self.original_error = Some(original.into());
        self
    }
}

/// Extra inputs for one [`recover`](ErrorRecoverySystem::recover) call.
///
/// A clone is handed to every strategy invocation with `attempt` and
/// `last_error` filled in.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    pub original_input: String,
    /// Candidates tried alongside the error's own strategy.
    pub available_strategies: Vec<RecoveryStrategy>,
    /// Wall-clock bound on the whole call. `None` means unbounded.
    pub deadline: Option<Duration>,
    /// 1-indexed invocation number within this call.
    pub attempt: u32,
    /// Message of the most recent failure, starting with the classified error.
    pub last_error: Option<String>,
}

impl RecoveryContext {
    pub fn new(original_input: impl Into<String>) -> Self {
        Self {
            original_input: original_input.into(),
            ..Default::default()
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<RecoveryStrategy>) -> Self {
        self.available_strategies = strategies;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<ParseError>,
    /// Confidence of the strategy that succeeded; 0 on failure.
    pub confidence: f64,
    pub attempts_used: u32,
    pub recovery_path: Vec<String>,
}

impl<T> RecoveryResult<T> {
    pub fn max_retries_exceeded(&self) -> bool {
        self.recovery_path.iter().any(|s| s == MAX_RETRIES_EXCEEDED)
    }
}

/// Classifies failures and drives recovery.
#[derive(Debug)]
pub struct ErrorRecoverySystem {
    factory: StrategyFactory,
    max_retries: u32,
    attempts: Mutex<HashMap<Uuid, u32>>,
}

impl Default for ErrorRecoverySystem {
    fn default() -> Self {
        Self::from_config(&ParserConfig::default())
    }
}

impl ErrorRecoverySystem {
    pub fn new(factory: StrategyFactory, max_retries: u32) -> Self {
        Self {
            factory,
            max_retries,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(StrategyFactory::from_config(config), config.ai_provider.max_retries)
    }

    pub fn factory(&self) -> &StrategyFactory {
        &self.factory
    }

    pub fn classify_error(&self, message: &str, level: ErrorLevel, context: Option<Value>) -> ParseError {
        classify_error(&self.factory, message, level, context)
    }

    /// Invocations already spent on this error instance.
    pub fn attempts_for(&self, error: &ParseError) -> u32 {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.get(&error.id).copied().unwrap_or(0)
    }

    /// Claim one invocation for `error`. False once `maxRetries + 1` are
    /// claimed.
    fn reserve_attempt(&self, error: &ParseError) -> bool {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let used = attempts.entry(error.id).or_insert(0);
        if *used > self.max_retries {
            return false;
        }
        *used += 1;
        true
    }

    /// Drop the attempt counter for a finished error.
    pub fn release(&self, error: &ParseError) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(&error.id);
    }

    /// Try candidates in descending confidence order until one succeeds.
    ///
    /// `recovery_fn` is invoked at most `maxRetries + 1` times per error
    /// instance, across calls, concurrent ones included. Retry strategies sleep for their
    /// `retry_delay` first. A failed strategy is appended to the recovery
    /// path and the next candidate is tried.
    pub async fn recover<T, F, Fut>(
        &self,
        error: &ParseError,
        ctx: &RecoveryContext,
        mut recovery_fn: F,
    ) -> RecoveryResult<T>
    where
        F: FnMut(RecoveryStrategy, RecoveryContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let budget = (self.max_retries + 1).saturating_sub(self.attempts_for(error));
        let mut machine = RecoveryMachine::new(
            error.recovery_strategy.clone(),
            ctx.available_strategies.clone(),
            budget,
        );
        let started = tokio::time::Instant::now();
        let past_deadline = |extra: Duration| ctx.deadline.is_some_and(|d| started.elapsed() + extra > d);

        let mut attempt_ctx = ctx.clone();
        attempt_ctx.last_error = Some(error.message.clone());
        let mut result = None;

        loop {
            let input = match machine.state() {
                RecoveryState::Succeeded(_) | RecoveryState::Exhausted => break,
                RecoveryState::Classifying => MachineInput::Next,
                RecoveryState::Delaying { delay, .. } => {
                    let delay = *delay;
                    if past_deadline(delay) {
                        MachineInput::DeadlineExceeded
                    } else {
                        tracing::debug!(?delay, error_id = %error.id, "delaying before retry");
                        tokio::time::sleep(delay).await;
                        MachineInput::DelayElapsed
                    }
                }
                RecoveryState::Attempting(strategy) => {
                    if past_deadline(Duration::ZERO) {
                        MachineInput::DeadlineExceeded
                    } else if !self.reserve_attempt(error) {
                        tracing::debug!(error_id = %error.id, "attempt ceiling reached by a concurrent recovery");
                        MachineInput::BudgetExhausted
                    } else {
                        attempt_ctx.attempt = machine.invocations();
                        tracing::debug!(
                            strategy = %strategy.strategy,
                            confidence = strategy.confidence,
                            attempt = attempt_ctx.attempt,
                            "attempting recovery"
                        );
                        match recovery_fn(strategy.clone(), attempt_ctx.clone()).await {
                            Ok(value) => {
                                result = Some(value);
                                MachineInput::Succeeded
                            }
                            Err(e) => {
                                tracing::warn!(strategy = %strategy.strategy, error = %e, "recovery strategy failed");
                                attempt_ctx.last_error = Some(e.to_string());
                                MachineInput::Failed
                            }
                        }
                    }
                }
            };
            machine.advance(input);
        }

        let attempts_used = machine.invocations();
        match machine.state().clone() {
            RecoveryState::Succeeded(strategy) => RecoveryResult {
                success: true,
                result,
                error: None,
                confidence: strategy.confidence,
                attempts_used,
                recovery_path: machine.into_path(),
            },
            _ => RecoveryResult {
                success: false,
                result: None,
                error: Some(error.clone()),
                confidence: 0.0,
                attempts_used,
                recovery_path: machine.into_path(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn system(max_retries: u32) -> ErrorRecoverySystem {
        let config = ParserConfig {
            ai_provider: crate::config::AiProviderConfig {
                max_retries,
                ..Default::default()
            },
            ..Default::default()
        };
        ErrorRecoverySystem::from_config(&config)
    }

    fn fallback_error(sys: &ErrorRecoverySystem, confidence: f64) -> ParseError {
        let mut err = sys.classify_error("malformed input", ErrorLevel::Input, None);
        err.recovery_strategy = sys.factory().create_fallback_strategy(confidence);
        err
    }

    #[tokio::test]
    async fn test_tries_in_descending_confidence() {
        let sys = system(5);
        let err = fallback_error(&sys, 0.3);
        let ctx = RecoveryContext::new("x").with_strategies(vec![
            sys.factory().create_fallback_strategy(0.9),
            sys.factory().create_prompt_enhancement_strategy(0.6),
        ]);
        let mut seen = Vec::new();
        let result: RecoveryResult<()> = sys
            .recover(&err, &ctx, |strategy, _| {
                seen.push(strategy.confidence);
                async { Err::<(), _>(anyhow::anyhow!("nope")) }
            })
            .await;
        assert_eq!(seen, vec![0.9, 0.6, 0.3]);
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.recovery_path, ["fallback", "enhance_prompt", "fallback"]);
        assert_eq!(result.error.as_ref().map(|e| e.id), Some(err.id));
    }

    #[tokio::test]
    async fn test_success_returns_strategy_confidence() {
        let sys = system(3);
        let err = fallback_error(&sys, 0.4);
        let ctx = RecoveryContext::new("x").with_strategies(vec![sys.factory().create_prompt_enhancement_strategy(0.7)]);
        let result = sys
            .recover(&err, &ctx, |strategy, attempt_ctx| async move {
                match strategy.strategy {
                    StrategyKind::EnhancePrompt => Err(anyhow::anyhow!("still invalid")),
                    _ => Ok(attempt_ctx.last_error.unwrap_or_default()),
                }
            })
            .await;
        assert!(result.success);
        assert_eq!(result.result.as_deref(), Some("still invalid"));
        assert!((result.confidence - 0.4).abs() < 1e-9);
        assert_eq!(result.attempts_used, 2);
        assert_eq!(result.recovery_path, ["enhance_prompt", "fallback"]);
    }

    #[tokio::test]
    async fn test_invocations_bounded_by_max_retries() {
        for max_retries in [0u32, 1, 2] {
            let sys = system(max_retries);
            let err = fallback_error(&sys, 0.9);
            let extra = (0..6).map(|i| sys.factory().create_fallback_strategy(0.8 - 0.1 * i as f64)).collect();
            let ctx = RecoveryContext::new("x").with_strategies(extra);
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let result: RecoveryResult<()> = sys
                .recover(&err, &ctx, move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(anyhow::anyhow!("fail")) }
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
            assert!(result.max_retries_exceeded());
            assert!(!result.success);

            // The ceiling holds across calls for the same error instance.
            let again: RecoveryResult<()> = sys.recover(&err, &ctx, |_, _| async { Ok::<(), anyhow::Error>(()) }).await;
            assert!(!again.success);
            assert_eq!(again.recovery_path, [MAX_RETRIES_EXCEEDED]);

            sys.release(&err);
            assert_eq!(sys.attempts_for(&err), 0);
        }
    }

    #[tokio::test]
    async fn test_ceiling_shared_by_concurrent_recoveries() {
        let sys = system(1);
        let err = fallback_error(&sys, 0.9);
        let extra = (0..4).map(|i| sys.factory().create_fallback_strategy(0.8 - 0.1 * i as f64)).collect();
        let ctx = RecoveryContext::new("x").with_strategies(extra);
        let calls = AtomicU32::new(0);
        let attempt = |_: RecoveryStrategy, _: RecoveryContext| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Err::<(), _>(anyhow::anyhow!("fail"))
            }
        };

        let (first, second) = tokio::join!(sys.recover(&err, &ctx, attempt), sys.recover(&err, &ctx, attempt));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.attempts_used + second.attempts_used, 2);
        assert!(first.max_retries_exceeded());
        assert!(second.max_retries_exceeded());
        assert_eq!(sys.attempts_for(&err), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_delay() {
        let sys = system(3);
        let err = sys.classify_error("Rate limit exceeded", ErrorLevel::Ai, None);
        let started = tokio::time::Instant::now();
        let result = sys.recover(&err, &RecoveryContext::new("x"), |_, _| async { Ok::<u32, anyhow::Error>(1) }).await;
        assert!(result.success);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(result.recovery_path, ["retry"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_delayed_retry() {
        let sys = system(3);
        let err = sys.classify_error("Rate limit exceeded", ErrorLevel::Ai, None);
        let ctx = RecoveryContext::new("x").with_deadline(Duration::from_millis(100));
        let result: RecoveryResult<()> = sys.recover(&err, &ctx, |_, _| async { Ok::<(), anyhow::Error>(()) }).await;
        assert!(!result.success);
        assert_eq!(result.attempts_used, 0);
        assert_eq!(result.recovery_path, [DEADLINE_EXCEEDED]);
    }

    #[test]
    fn test_parse_error_serializes() {
        let err = ErrorRecoverySystem::default().classify_error("Rate limit exceeded", ErrorLevel::Ai, None);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "rate_limit");
        assert_eq!(json["level"], "ai");
        assert_eq!(json["recoveryStrategy"]["strategy"], "retry");
        assert_eq!(err.to_string(), "rate_limit: Rate limit exceeded");
    }
}
