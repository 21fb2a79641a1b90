use super::DiagnosticInfo;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Stage timer for a single parse call. Not shared between calls.
#[derive(Debug)]
pub struct PerformanceMonitor {
    attempt_id: Uuid,
    created: Instant,
    open: HashMap<&'static str, (DateTime<Utc>, Instant)>,
    finished: Vec<DiagnosticInfo>,
}

impl PerformanceMonitor {
    pub fn new(attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            created: Instant::now(),
            open: HashMap::new(),
            finished: Vec::new(),
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Time since the monitor was created.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Open `stage`. Restarting an open stage resets its clock.
    pub fn start_stage(&mut self, stage: &'static str) {
        self.open.insert(stage, (Utc::now(), Instant::now()));
    }

    /// Close `stage`, returning its duration in milliseconds. `None` when
    /// the stage was never started.
    pub fn end_stage(&mut self, stage: &'static str, error: Option<String>) -> Option<u64> {
        let Some((started_at, started)) = self.open.remove(stage) else {
            tracing::warn!(stage, "end_stage without start_stage");
            return None;
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.finished.push(DiagnosticInfo {
            id: Uuid::new_v4(),
            attempt_id: self.attempt_id,
            stage: stage.to_string(),
            started_at,
            duration_ms,
            success: error.is_none(),
            error,
            metadata: Map::new(),
        });
        Some(duration_ms)
    }

    /// Attach `key = value` to the most recent finished record of `stage`.
    pub fn annotate(&mut self, stage: &str, key: &str, value: impl Into<Value>) {
        if let Some(info) = self.finished.iter_mut().rev().find(|d| d.stage == stage) {
            info.metadata.insert(key.to_string(), value.into());
        }
    }

    pub fn open_stages(&self) -> Vec<&'static str> {
        let mut stages: Vec<_> = self.open.keys().copied().collect();
        stages.sort_unstable();
        stages
    }

    pub fn diagnostics(&self) -> &[DiagnosticInfo] {
        &self.finished
    }

    pub fn into_diagnostics(self) -> Vec<DiagnosticInfo> {
        self.finished
    }
}
