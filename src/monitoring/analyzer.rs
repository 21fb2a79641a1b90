//! Turns collected telemetry into recommendations and config deltas.

use super::{DiagnosticInfo, MetricsSummary, ParseAttempt, ParsingMetricsCollector};
use crate::config::{ConfigManager, ParserConfig};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const MIN_DETECTION_ACCURACY: f64 = 0.8;
pub const MAX_MEAN_LATENCY_MS: f64 = 1500.0;
pub const MAX_FALLBACK_RATIO: f64 = 0.3;
pub const MAX_RETRY_RATIO: f64 = 0.5;
/// Suggested timeouts are at least this multiple of the mean latency.
pub const TIMEOUT_HEADROOM: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// Short machine-friendly tag, e.g. `"latency"`.
    pub category: String,
    pub priority: Priority,
    pub message: String,
    /// The observed value that triggered it.
    pub observed: f64,
    pub threshold: f64,
}

/// A proposed change to one config key, addressed by camelCase path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSuggestion {
    pub path: String,
    pub current: Value,
    pub suggested: Value,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub summary: MetricsSummary,
    /// Share of attempts whose format confidence met the configured threshold.
    pub detection_accuracy: f64,
    pub recommendations: Vec<Recommendation>,
    pub config_suggestions: Vec<ConfigSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNote {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// A named group of attempts and notes for a manual postmortem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub attempt_ids: Vec<Uuid>,
    pub notes: Vec<SessionNote>,
}

impl DebugSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Everything the monitoring layer knows, in one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticExport {
    pub report: DiagnosticReport,
    pub attempts: Vec<ParseAttempt>,
    pub diagnostics: Vec<DiagnosticInfo>,
    pub sessions: Vec<DebugSession>,
}

/// Share of `attempts` whose detection confidence reached `threshold`.
/// An empty history counts as fully accurate.
pub fn detection_accuracy(attempts: &[ParseAttempt], threshold: f64) -> f64 {
    if attempts.is_empty() {
        return 1.0;
    }
    let accurate = attempts.iter().filter(|a| a.format_confidence >= threshold).count();
    accurate as f64 / attempts.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug)]
pub struct DiagnosticAnalyzer {
    metrics: Arc<ParsingMetricsCollector>,
    config: Arc<ConfigManager>,
    sessions: Mutex<BTreeMap<Uuid, DebugSession>>,
}

impl DiagnosticAnalyzer {
    pub fn new(metrics: Arc<ParsingMetricsCollector>, config: Arc<ConfigManager>) -> Self {
        Self {
            metrics,
            config,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn generate_report(&self) -> DiagnosticReport {
        let config = self.config.get_config();
        let attempts = self.metrics.attempts();
        let summary = self.metrics.summary();
        let accuracy = detection_accuracy(&attempts, config.format_detection.confidence_threshold);

        DiagnosticReport {
            generated_at: Utc::now(),
            recommendations: recommendations(&summary, accuracy),
            config_suggestions: config_suggestions(&summary, accuracy, &config),
            detection_accuracy: accuracy,
            summary,
        }
    }

    /// Apply the current report's config suggestions through the config
    /// manager. Returns what was applied; nothing changes on error.
    pub fn apply_suggestions(&self) -> Result<Vec<ConfigSuggestion>> {
        let suggestions = self.generate_report().config_suggestions;
        if suggestions.is_empty() {
            return Ok(suggestions);
        }

        let mut partial = json!({});
        for suggestion in &suggestions {
            let mut slot = &mut partial;
            for key in suggestion.path.split('.') {
                slot = &mut slot[key];
            }
            *slot = suggestion.suggested.clone();
        }
        self.config.update_config(&partial)?;
        tracing::info!(applied = suggestions.len(), "config suggestions applied");
        Ok(suggestions)
    }

    pub fn start_debug_session(&self, name: impl Into<String>) -> Uuid {
        let session = DebugSession {
            id: Uuid::new_v4(),
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            attempt_ids: Vec::new(),
            notes: Vec::new(),
        };
        let id = session.id;
        tracing::debug!(session_id = %id, name = %session.name, "debug session started");
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(id, session);
        id
    }

    fn with_active<R>(&self, id: Uuid, f: impl FnOnce(&mut DebugSession) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(&id).filter(|s| s.is_active()).map(f)
    }

    /// False when the session is unknown or already ended.
    pub fn add_note(&self, id: Uuid, text: impl Into<String>) -> bool {
        let text = text.into();
        self.with_active(id, |s| {
            s.notes.push(SessionNote { at: Utc::now(), text });
        })
        .is_some()
    }

    pub fn attach_attempt(&self, id: Uuid, attempt_id: Uuid) -> bool {
        self.with_active(id, |s| {
            if !s.attempt_ids.contains(&attempt_id) {
                s.attempt_ids.push(attempt_id);
            }
        })
        .is_some()
    }

    pub fn end_debug_session(&self, id: Uuid) -> Option<DebugSession> {
        self.with_active(id, |s| {
            s.ended_at = Some(Utc::now());
            s.clone()
        })
    }

    pub fn session(&self, id: Uuid) -> Option<DebugSession> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    pub fn sessions(&self) -> Vec<DebugSession> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
    }

    pub fn export_diagnostic_data(&self) -> DiagnosticExport {
        DiagnosticExport {
            report: self.generate_report(),
            attempts: self.metrics.attempts(),
            diagnostics: self.metrics.diagnostics(),
            sessions: self.sessions(),
        }
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_diagnostic_data())?)
    }
}

fn recommendations(summary: &MetricsSummary, accuracy: f64) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if summary.total_attempts == 0 {
        return out;
    }

    if accuracy < MIN_DETECTION_ACCURACY {
        out.push(Recommendation {
            category: "detection_accuracy".into(),
            priority: Priority::High,
            message: format!(
                "Only {:.0}% of inputs were classified confidently; consider lowering formatDetection.confidenceThreshold or adding format rules",
                accuracy * 100.0
            ),
            observed: accuracy,
            threshold: MIN_DETECTION_ACCURACY,
        });
    }
    if summary.mean_latency_ms > MAX_MEAN_LATENCY_MS {
        out.push(Recommendation {
            category: "latency".into(),
            priority: Priority::Medium,
            message: format!(
                "Mean parse latency is {:.0}ms; consider a faster model or shorter inputs",
                summary.mean_latency_ms
            ),
            observed: summary.mean_latency_ms,
            threshold: MAX_MEAN_LATENCY_MS,
        });
    }
    if summary.fallback_ratio > MAX_FALLBACK_RATIO {
        out.push(Recommendation {
            category: "fallback_rate".into(),
            priority: Priority::High,
            message: format!(
                "{:.0}% of parses fell back to deterministic extraction; check AI provider health and prompt quality",
                summary.fallback_ratio * 100.0
            ),
            observed: summary.fallback_ratio,
            threshold: MAX_FALLBACK_RATIO,
        });
    }
    if summary.retry_ratio > MAX_RETRY_RATIO {
        out.push(Recommendation {
            category: "retry_rate".into(),
            priority: Priority::Medium,
            message: format!(
                "{:.0}% of parses needed recovery; inspect the most common error types",
                summary.retry_ratio * 100.0
            ),
            observed: summary.retry_ratio,
            threshold: MAX_RETRY_RATIO,
        });
    }
    out
}

fn config_suggestions(summary: &MetricsSummary, accuracy: f64, config: &ParserConfig) -> Vec<ConfigSuggestion> {
    let mut out = Vec::new();
    if summary.total_attempts == 0 {
        return out;
    }

    let timeout = config.ai_provider.timeout_ms;
    let floor = (summary.mean_latency_ms * TIMEOUT_HEADROOM).ceil();
    if floor > timeout as f64 {
        out.push(ConfigSuggestion {
            path: "aiProvider.timeoutMs".into(),
            current: json!(timeout),
            suggested: json!(floor as u64),
            reason: format!(
                "timeout should be at least {}x the observed mean latency of {:.0}ms",
                TIMEOUT_HEADROOM, summary.mean_latency_ms
            ),
        });
    }

    let threshold = config.format_detection.confidence_threshold;
    let observed = summary.mean_format_confidence;
    if accuracy < MIN_DETECTION_ACCURACY && observed < threshold {
        let suggested = round2((threshold + observed) / 2.0).clamp(0.0, 1.0);
        if suggested < threshold {
            out.push(ConfigSuggestion {
                path: "formatDetection.confidenceThreshold".into(),
                current: json!(threshold),
                suggested: json!(suggested),
                reason: format!(
                    "mean detection confidence {:.2} is below the threshold {:.2}",
                    observed, threshold
                ),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::tests::attempt;
    use crate::types::ParseSource;

    fn analyzer() -> (DiagnosticAnalyzer, Arc<ParsingMetricsCollector>, Arc<ConfigManager>) {
        let metrics = Arc::new(ParsingMetricsCollector::default());
        let config = Arc::new(ConfigManager::default());
        (DiagnosticAnalyzer::new(metrics.clone(), config.clone()), metrics, config)
    }

    #[test]
    fn test_healthy_history_has_no_recommendations() {
        let (analyzer, metrics, _) = analyzer();
        for _ in 0..5 {
            metrics.record_attempt(attempt(true, 200));
        }
        let report = analyzer.generate_report();
        assert_eq!(report.detection_accuracy, 1.0);
        assert!(report.recommendations.is_empty());
        assert!(report.config_suggestions.is_empty());
    }

    #[test]
    fn test_empty_history() {
        let (analyzer, _, _) = analyzer();
        let report = analyzer.generate_report();
        assert!(report.recommendations.is_empty());
        assert!(report.config_suggestions.is_empty());
    }

    #[test]
    fn test_each_threshold_triggers() {
        let (analyzer, metrics, _) = analyzer();
        for i in 0..4 {
            let mut a = attempt(true, 2_000);
            a.format_confidence = 0.4;
            a.retry_count = 1;
            if i < 2 {
                a.source = Some(ParseSource::Fallback);
            }
            metrics.record_attempt(a);
        }
        let report = analyzer.generate_report();
        let categories: Vec<&str> = report.recommendations.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, ["detection_accuracy", "latency", "fallback_rate", "retry_rate"]);
    }

    #[test]
    fn test_config_suggestions_and_apply() {
        let (analyzer, metrics, config) = analyzer();
        config.update_config(&json!({"aiProvider": {"timeoutMs": 1000}})).unwrap();
        for _ in 0..3 {
            let mut a = attempt(true, 2_000);
            a.format_confidence = 0.5;
            metrics.record_attempt(a);
        }

        let suggestions = analyzer.generate_report().config_suggestions;
        let timeout = suggestions.iter().find(|s| s.path == "aiProvider.timeoutMs").unwrap();
        assert_eq!(timeout.suggested, json!(3000));
        let threshold = suggestions
            .iter()
            .find(|s| s.path == "formatDetection.confidenceThreshold")
            .unwrap();
        assert_eq!(threshold.suggested, json!(0.6));

        let applied = analyzer.apply_suggestions().unwrap();
        assert_eq!(applied.len(), 2);
        let updated = config.get_config();
        assert_eq!(updated.ai_provider.timeout_ms, 3000);
        assert!((updated.format_detection.confidence_threshold - 0.6).abs() < 1e-9);
        // Other sections untouched.
        assert_eq!(updated.ai_provider.max_retries, 3);
    }

    #[test]
    fn test_debug_session_lifecycle() {
        let (analyzer, _, _) = analyzer();
        let id = analyzer.start_debug_session("flaky curl inputs");
        let attempt_id = Uuid::new_v4();
        assert!(analyzer.add_note(id, "fails on multiline -d"));
        assert!(analyzer.attach_attempt(id, attempt_id));
        assert!(analyzer.attach_attempt(id, attempt_id));

        let ended = analyzer.end_debug_session(id).unwrap();
        assert_eq!(ended.attempt_ids, vec![attempt_id]);
        assert_eq!(ended.notes.len(), 1);
        assert!(!ended.is_active());

        assert!(!analyzer.add_note(id, "too late"));
        assert!(analyzer.end_debug_session(id).is_none());
        assert!(!analyzer.add_note(Uuid::new_v4(), "unknown"));
    }

    #[test]
    fn test_export_is_serializable() {
        let (analyzer, metrics, _) = analyzer();
        metrics.record_attempt(attempt(true, 10));
        analyzer.start_debug_session("s");
        let json: Value = serde_json::from_str(&analyzer.export_json().unwrap()).unwrap();
        assert_eq!(json["attempts"].as_array().unwrap().len(), 1);
        assert_eq!(json["sessions"].as_array().unwrap().len(), 1);
        assert!(json["report"]["summary"]["totalAttempts"].is_number());

        let back: DiagnosticExport = serde_json::from_value(json).unwrap();
        assert_eq!(back.attempts.len(), 1);
    }
}
