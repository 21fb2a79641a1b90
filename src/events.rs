//! Lifecycle hooks for a parse.
//!
//! Implement [`EventHandler`] to observe stages, recovery attempts, and
//! transport retries as they happen. Parsing works the same without one.

use std::sync::Arc;

/// Events emitted while parsing one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A stage is about to run.
    StageStart {
        attempt_id: String,
        stage: &'static str,
    },
    /// A stage finished.
    StageEnd {
        attempt_id: String,
        stage: &'static str,
        ok: bool,
        duration_ms: u64,
    },
    /// A recovery strategy is about to be invoked.
    RecoveryAttempt {
        attempt_id: String,
        /// `retry`, `fallback` or `enhance_prompt`.
        strategy: String,
        /// 1-indexed invocation count for this error.
        attempt: u32,
        error_type: String,
    },
    /// The deterministic fallback produced the result.
    FallbackUsed { attempt_id: String, reason: String },
    /// A transport-level retry against the AI provider.
    TransportRetry {
        attempt_id: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// The parse finished, successfully or not.
    ParseComplete {
        attempt_id: String,
        success: bool,
        confidence: f64,
        /// `ai`, `recovered` or `fallback`; empty on failure.
        source: String,
    },
}

/// Receiver for [`Event`]s.
///
/// ```
/// use loadtest_parser::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::StageEnd { stage, duration_ms, .. } = event {
///             println!("{} took {}ms", stage, duration_ms);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use loadtest_parser::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::FallbackUsed { reason, .. } = event {
///         eprintln!("fallback: {}", reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(
            &None,
            Event::FallbackUsed {
                attempt_id: "a".into(),
                reason: "x".into(),
            },
        );
    }

    #[test]
    fn test_fn_handler_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Option<Arc<dyn EventHandler>> = Some(Arc::new(FnEventHandler(move |e: Event| {
            sink.lock().unwrap().push(e);
        })));
        emit(
            &handler,
            Event::StageStart {
                attempt_id: "a".into(),
                stage: "preprocess",
            },
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
