//! Parse telemetry and the feedback loop back into configuration.
//!
//! - [`ParsingMetricsCollector`]: process-wide store of [`ParseAttempt`]s and
//!   stage [`DiagnosticInfo`] records with rolling aggregates.
//! - [`PerformanceMonitor`]: per-parse `start_stage`/`end_stage` bracketing.
//! - [`DiagnosticAnalyzer`]: recommendations, config suggestions, debug
//!   sessions, and the exportable snapshot.

pub mod analyzer;
pub mod metrics;
pub mod performance;

pub use analyzer::{
    ConfigSuggestion, DebugSession, DiagnosticAnalyzer, DiagnosticExport, DiagnosticReport, Priority, Recommendation,
    SessionNote,
};
pub use metrics::ParsingMetricsCollector;
pub use performance::PerformanceMonitor;

use crate::format::InputFormat;
use crate::recovery::ErrorType;
use crate::types::ParseSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One top-level parse call. Exactly one is recorded per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseAttempt {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub input_length: usize,
    pub format: InputFormat,
    pub format_confidence: f64,
    /// Final confidence; zero for failed parses.
    pub confidence: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ParseSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    /// Recovery strategies invoked.
    pub retry_count: u32,
    pub assumption_count: usize,
    pub warning_count: usize,
    pub latency_ms: u64,
    #[serde(default)]
    pub recovery_path: Vec<String>,
}

impl ParseAttempt {
    pub fn used_fallback(&self) -> bool {
        self.source == Some(ParseSource::Fallback)
    }
}

/// Timing and outcome of one pipeline stage within an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInfo {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStats {
    pub count: usize,
    pub mean_duration_ms: f64,
    pub success_rate: f64,
}

/// Rolling aggregates over the retained attempts and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_attempts: usize,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub mean_confidence: f64,
    pub mean_format_confidence: f64,
    pub error_type_counts: BTreeMap<String, usize>,
    pub format_counts: BTreeMap<String, usize>,
    /// Share of attempts answered by the deterministic parser.
    pub fallback_ratio: f64,
    /// Share of attempts that needed at least one recovery strategy.
    pub retry_ratio: f64,
    pub stages: BTreeMap<String, StageStats>,
}
