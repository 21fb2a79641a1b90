//! Recovery control flow as a synchronous state machine.
//!
//! [`RecoveryMachine`] decides *what* happens next; the async driver in
//! [`ErrorRecoverySystem::recover`](super::ErrorRecoverySystem::recover)
//! performs the sleeps and strategy calls and feeds results back as
//! [`MachineInput`]s.
//!
//! ```text
//! Classifying ──Next──► Delaying ──DelayElapsed──► Attempting ──Succeeded──► Succeeded
//!      ▲    └──────────────Next (no delay)────────────►  │
//!      └──────────────────────Failed─────────────────────┘
//! Classifying ──Next (no candidates | budget spent)──► Exhausted
//! Attempting ──BudgetExhausted──► Exhausted
//! ```

use super::strategy::{RecoveryStrategy, StrategyKind};
use std::collections::VecDeque;
use std::time::Duration;

/// Appended to the recovery path when the attempt budget runs out.
pub const MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";
/// Appended to the recovery path when the overall deadline passes.
pub const DEADLINE_EXCEEDED: &str = "deadline_exceeded";

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryState {
    /// Choosing the next candidate.
    Classifying,
    /// Waiting before a retry.
    Delaying { strategy: RecoveryStrategy, delay: Duration },
    /// The strategy is being invoked.
    Attempting(RecoveryStrategy),
    Succeeded(RecoveryStrategy),
    Exhausted,
}

impl RecoveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Succeeded(_) | RecoveryState::Exhausted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineInput {
    Next,
    DelayElapsed,
    Failed,
    Succeeded,
    DeadlineExceeded,
    /// The shared attempt ceiling was reached before the strategy ran.
    BudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct RecoveryMachine {
    state: RecoveryState,
    candidates: VecDeque<RecoveryStrategy>,
    invocations: u32,
    budget: u32,
    path: Vec<String>,
}

impl RecoveryMachine {
    /// Candidates are `primary` followed by `extra`, stable-sorted by
    /// descending confidence. At most `budget` strategies are invoked.
    pub fn new(primary: RecoveryStrategy, extra: Vec<RecoveryStrategy>, budget: u32) -> Self {
        let mut candidates: Vec<RecoveryStrategy> = std::iter::once(primary).chain(extra).collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Self {
            state: RecoveryState::Classifying,
            candidates: candidates.into(),
            invocations: 0,
            budget,
            path: Vec::new(),
        }
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    /// Strategies invoked so far.
    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    /// Names of the strategies tried, in order, plus any abort sentinel.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn into_path(self) -> Vec<String> {
        self.path
    }

    /// Apply one input. Inputs that make no sense in the current state leave
    /// it unchanged; terminal states absorb everything.
    pub fn advance(&mut self, input: MachineInput) -> &RecoveryState {
        let current = std::mem::replace(&mut self.state, RecoveryState::Exhausted);
        self.state = match (current, input) {
            (terminal, _) if terminal.is_terminal() => terminal,
            (_, MachineInput::DeadlineExceeded) => {
                self.path.push(DEADLINE_EXCEEDED.to_string());
                RecoveryState::Exhausted
            }
            (current, MachineInput::BudgetExhausted) => {
                if matches!(current, RecoveryState::Attempting(_)) {
                    self.invocations = self.invocations.saturating_sub(1);
                }
                self.path.push(MAX_RETRIES_EXCEEDED.to_string());
                RecoveryState::Exhausted
            }
            (RecoveryState::Classifying, MachineInput::Next) => self.select(),
            (RecoveryState::Delaying { strategy, .. }, MachineInput::DelayElapsed) => self.begin(strategy),
            (RecoveryState::Attempting(strategy), MachineInput::Failed) => {
                self.path.push(strategy.strategy.as_str().to_string());
                RecoveryState::Classifying
            }
            (RecoveryState::Attempting(strategy), MachineInput::Succeeded) => {
                self.path.push(strategy.strategy.as_str().to_string());
                RecoveryState::Succeeded(strategy)
            }
            (unchanged, _) => unchanged,
        };
        &self.state
    }

    fn select(&mut self) -> RecoveryState {
        while let Some(strategy) = self.candidates.pop_front() {
            if !strategy.can_recover {
                tracing::debug!(strategy = %strategy.strategy, "strategy disabled, skipping");
                continue;
            }
            if self.invocations >= self.budget {
                self.path.push(MAX_RETRIES_EXCEEDED.to_string());
                return RecoveryState::Exhausted;
            }
            return match strategy.retry_delay() {
                Some(delay) if strategy.strategy == StrategyKind::Retry && !delay.is_zero() => {
                    RecoveryState::Delaying { strategy, delay }
                }
                _ => self.begin(strategy),
            };
        }
        RecoveryState::Exhausted
    }

    fn begin(&mut self, strategy: RecoveryStrategy) -> RecoveryState {
        self.invocations += 1;
        RecoveryState::Attempting(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::strategy::StrategyFactory;

    fn fallback(confidence: f64) -> RecoveryStrategy {
        StrategyFactory::default().create_fallback_strategy(confidence)
    }

    fn attempted(machine: &RecoveryMachine) -> f64 {
        match machine.state() {
            RecoveryState::Attempting(s) => s.confidence,
            other => panic!("expected Attempting, got {:?}", other),
        }
    }

    #[test]
    fn test_candidates_tried_by_descending_confidence() {
        let mut machine = RecoveryMachine::new(fallback(0.3), vec![fallback(0.9), fallback(0.6)], 10);
        let mut order = Vec::new();
        machine.advance(MachineInput::Next);
        while !machine.state().is_terminal() {
            order.push(attempted(&machine));
            machine.advance(MachineInput::Failed);
            machine.advance(MachineInput::Next);
        }
        assert_eq!(order, vec![0.9, 0.6, 0.3]);
        assert_eq!(machine.state(), &RecoveryState::Exhausted);
        assert_eq!(machine.path(), ["fallback", "fallback", "fallback"]);
    }

    #[test]
    fn test_retry_with_delay_goes_through_delaying() {
        let retry = StrategyFactory::default().create_retry_strategy(0.9, 0);
        let mut machine = RecoveryMachine::new(retry, Vec::new(), 2);
        assert!(matches!(
            machine.advance(MachineInput::Next),
            RecoveryState::Delaying { delay, .. } if *delay == Duration::from_secs(1)
        ));
        assert_eq!(machine.invocations(), 0);
        assert!(matches!(machine.advance(MachineInput::DelayElapsed), RecoveryState::Attempting(_)));
        assert_eq!(machine.invocations(), 1);
        assert!(matches!(machine.advance(MachineInput::Succeeded), RecoveryState::Succeeded(_)));
        assert_eq!(machine.path(), ["retry"]);
    }

    #[test]
    fn test_budget_exhaustion_appends_sentinel() {
        let mut machine = RecoveryMachine::new(fallback(0.9), vec![fallback(0.8), fallback(0.7)], 1);
        machine.advance(MachineInput::Next);
        machine.advance(MachineInput::Failed);
        machine.advance(MachineInput::Next);
        assert_eq!(machine.state(), &RecoveryState::Exhausted);
        assert_eq!(machine.invocations(), 1);
        assert_eq!(machine.path(), ["fallback", MAX_RETRIES_EXCEEDED]);
    }

    #[test]
    fn test_refused_attempt_is_not_counted() {
        let mut machine = RecoveryMachine::new(fallback(0.9), vec![fallback(0.8)], 5);
        machine.advance(MachineInput::Next);
        assert_eq!(machine.invocations(), 1);
        machine.advance(MachineInput::BudgetExhausted);
        assert_eq!(machine.state(), &RecoveryState::Exhausted);
        assert_eq!(machine.invocations(), 0);
        assert_eq!(machine.path(), [MAX_RETRIES_EXCEEDED]);
    }

    #[test]
    fn test_disabled_candidates_skipped() {
        let disabled = StrategyFactory::default()
            .disable(StrategyKind::Fallback)
            .create_fallback_strategy(0.95);
        let mut machine = RecoveryMachine::new(disabled, vec![fallback(0.4)], 5);
        machine.advance(MachineInput::Next);
        assert_eq!(attempted(&machine), 0.4);
    }

    #[test]
    fn test_transition_table() {
        let delaying = RecoveryState::Delaying {
            strategy: fallback(0.5),
            delay: Duration::from_millis(5),
        };
        let cases = [
            (RecoveryState::Classifying, MachineInput::DelayElapsed, RecoveryState::Classifying),
            (RecoveryState::Classifying, MachineInput::DeadlineExceeded, RecoveryState::Exhausted),
            (delaying.clone(), MachineInput::Next, delaying.clone()),
            (delaying, MachineInput::DelayElapsed, RecoveryState::Attempting(fallback(0.5))),
            (RecoveryState::Attempting(fallback(0.5)), MachineInput::Failed, RecoveryState::Classifying),
            (RecoveryState::Succeeded(fallback(0.5)), MachineInput::Failed, RecoveryState::Succeeded(fallback(0.5))),
            (RecoveryState::Exhausted, MachineInput::Next, RecoveryState::Exhausted),
        ];
        for (from, input, expected) in cases {
            let mut machine = RecoveryMachine::new(fallback(0.1), Vec::new(), 3);
            machine.state = from.clone();
            assert_eq!(machine.advance(input), &expected, "{:?} + {:?}", from, input);
        }
    }

    #[test]
    fn test_empty_budget_never_attempts() {
        let mut machine = RecoveryMachine::new(fallback(0.9), Vec::new(), 0);
        machine.advance(MachineInput::Next);
        assert_eq!(machine.state(), &RecoveryState::Exhausted);
        assert_eq!(machine.path(), [MAX_RETRIES_EXCEEDED]);
    }
}
