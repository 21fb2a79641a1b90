use super::{DiagnosticInfo, MetricsSummary, ParseAttempt, StageStats};
use crate::config::MonitoringConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Store {
    attempts: Vec<ParseAttempt>,
    diagnostics: Vec<DiagnosticInfo>,
}

/// Process-wide telemetry store.
///
/// Share it via `Arc`. Every write purges entries older than the retention
/// window; every read returns owned copies.
#[derive(Debug)]
pub struct ParsingMetricsCollector {
    store: Mutex<Store>,
    settings: Mutex<MonitoringConfig>,
}

impl Default for ParsingMetricsCollector {
    fn default() -> Self {
        Self::new(MonitoringConfig::default())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl ParsingMetricsCollector {
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            settings: Mutex::new(config),
        }
    }

    /// Pick up `enableMetrics`, `enableDiagnostics`, and `metricsRetentionMs`
    /// from a new configuration.
    pub fn apply_config(&self, config: &MonitoringConfig) {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
    }

    fn settings(&self) -> MonitoringConfig {
        self.settings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.settings().metrics_retention_ms)
    }

    fn purge(store: &mut Store, retention: Duration, now: DateTime<Utc>) {
        let Ok(window) = chrono::Duration::from_std(retention) else {
            return;
        };
        let cutoff = now - window;
        let before = store.attempts.len() + store.diagnostics.len();
        store.attempts.retain(|a| a.timestamp >= cutoff);
        store.diagnostics.retain(|d| d.started_at >= cutoff);
        let purged = before - store.attempts.len() - store.diagnostics.len();
        if purged > 0 {
            tracing::debug!(purged, "expired telemetry purged");
        }
    }

    pub fn record_attempt(&self, attempt: ParseAttempt) {
        let settings = self.settings();
        if !settings.enable_metrics {
            return;
        }
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge(&mut store, Duration::from_millis(settings.metrics_retention_ms), Utc::now());
        tracing::debug!(
            attempt_id = %attempt.id,
            success = attempt.success,
            latency_ms = attempt.latency_ms,
            "parse attempt recorded"
        );
        store.attempts.push(attempt);
    }

    pub fn record_diagnostic(&self, info: DiagnosticInfo) {
        self.record_diagnostics(std::iter::once(info));
    }

    pub fn record_diagnostics(&self, infos: impl IntoIterator<Item = DiagnosticInfo>) {
        let settings = self.settings();
        if !settings.enable_diagnostics {
            return;
        }
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge(&mut store, Duration::from_millis(settings.metrics_retention_ms), Utc::now());
        store.diagnostics.extend(infos);
    }

    /// Drop expired entries without writing anything.
    pub fn purge_expired(&self) {
        let retention = self.retention();
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge(&mut store, retention, Utc::now());
    }

    pub fn attempts(&self) -> Vec<ParseAttempt> {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).attempts.clone()
    }

    pub fn attempt(&self, id: Uuid) -> Option<ParseAttempt> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.attempts.iter().find(|a| a.id == id).cloned()
    }

    pub fn diagnostics(&self) -> Vec<DiagnosticInfo> {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).diagnostics.clone()
    }

    pub fn diagnostics_for(&self, attempt_id: Uuid) -> Vec<DiagnosticInfo> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.diagnostics.iter().filter(|d| d.attempt_id == attempt_id).cloned().collect()
    }

    pub fn clear(&self) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.attempts.clear();
        store.diagnostics.clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let attempts = &store.attempts;
        let total = attempts.len();

        let mut error_type_counts = BTreeMap::new();
        let mut format_counts = BTreeMap::new();
        for attempt in attempts {
            *format_counts.entry(attempt.format.as_str().to_string()).or_insert(0) += 1;
            if let Some(error_type) = attempt.error_type {
                *error_type_counts.entry(error_type.as_str().to_string()).or_insert(0) += 1;
            }
        }

        let mut grouped: BTreeMap<&str, Vec<&DiagnosticInfo>> = BTreeMap::new();
        for info in &store.diagnostics {
            grouped.entry(info.stage.as_str()).or_default().push(info);
        }
        let stages = grouped
            .into_iter()
            .map(|(stage, infos)| {
                let stats = StageStats {
                    count: infos.len(),
                    mean_duration_ms: mean(infos.iter().map(|d| d.duration_ms as f64)),
                    success_rate: ratio(infos.iter().filter(|d| d.success).count(), infos.len()),
                };
                (stage.to_string(), stats)
            })
            .collect();

        MetricsSummary {
            total_attempts: total,
            success_rate: ratio(attempts.iter().filter(|a| a.success).count(), total),
            mean_latency_ms: mean(attempts.iter().map(|a| a.latency_ms as f64)),
            mean_confidence: mean(attempts.iter().map(|a| a.confidence)),
            mean_format_confidence: mean(attempts.iter().map(|a| a.format_confidence)),
            error_type_counts,
            format_counts,
            fallback_ratio: ratio(attempts.iter().filter(|a| a.used_fallback()).count(), total),
            retry_ratio: ratio(attempts.iter().filter(|a| a.retry_count > 0).count(), total),
            stages,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::InputFormat;
    use crate::recovery::ErrorType;
    use crate::types::ParseSource;

    pub(crate) fn attempt(success: bool, latency_ms: u64) -> ParseAttempt {
        ParseAttempt {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            input_length: 42,
            format: InputFormat::CurlCommand,
            format_confidence: 0.9,
            confidence: if success { 0.8 } else { 0.0 },
            success,
            source: success.then_some(ParseSource::Ai),
            error_type: None,
            retry_count: 0,
            assumption_count: 1,
            warning_count: 0,
            latency_ms,
            recovery_path: Vec::new(),
        }
    }

    fn diagnostic(attempt_id: Uuid, stage: &str, duration_ms: u64, success: bool) -> DiagnosticInfo {
        DiagnosticInfo {
            id: Uuid::new_v4(),
            attempt_id,
            stage: stage.to_string(),
            started_at: Utc::now(),
            duration_ms,
            success,
            error: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_summary_aggregates() {
        let collector = ParsingMetricsCollector::default();
        collector.record_attempt(attempt(true, 100));
        let mut failed = attempt(false, 300);
        failed.error_type = Some(ErrorType::RateLimit);
        failed.retry_count = 2;
        collector.record_attempt(failed);
        let mut fallback = attempt(true, 200);
        fallback.source = Some(ParseSource::Fallback);
        fallback.format = InputFormat::NaturalLanguage;
        collector.record_attempt(fallback);

        let s = collector.summary();
        assert_eq!(s.total_attempts, 3);
        assert!((s.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((s.mean_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(s.error_type_counts["rate_limit"], 1);
        assert_eq!(s.format_counts["curl_command"], 2);
        assert!((s.fallback_ratio - 1.0 / 3.0).abs() < 1e-9);
        assert!((s.retry_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stage_stats() {
        let collector = ParsingMetricsCollector::default();
        let id = Uuid::new_v4();
        collector.record_diagnostics([
            diagnostic(id, "ai_call", 100, true),
            diagnostic(id, "ai_call", 300, false),
            diagnostic(id, "preprocess", 2, true),
        ]);
        let s = collector.summary();
        assert_eq!(s.stages["ai_call"].count, 2);
        assert!((s.stages["ai_call"].mean_duration_ms - 200.0).abs() < 1e-9);
        assert!((s.stages["ai_call"].success_rate - 0.5).abs() < 1e-9);
        assert_eq!(collector.diagnostics_for(id).len(), 3);
    }

    #[test]
    fn test_write_purges_expired_entries() {
        let collector = ParsingMetricsCollector::new(MonitoringConfig {
            metrics_retention_ms: 60_000,
            ..Default::default()
        });
        let mut old = attempt(true, 10);
        old.timestamp = Utc::now() - chrono::Duration::minutes(5);
        let old_id = old.id;
        collector.record_attempt(old);
        assert!(collector.attempt(old_id).is_some());

        collector.record_attempt(attempt(true, 10));
        assert!(collector.attempt(old_id).is_none());
        assert_eq!(collector.attempts().len(), 1);
    }

    #[test]
    fn test_reads_are_copies() {
        let collector = ParsingMetricsCollector::default();
        collector.record_attempt(attempt(true, 10));
        let mut copy = collector.attempts();
        copy[0].latency_ms = 9_999;
        copy.clear();
        assert_eq!(collector.attempts()[0].latency_ms, 10);
    }

    #[test]
    fn test_disabled_metrics_record_nothing() {
        let collector = ParsingMetricsCollector::default();
        collector.apply_config(&MonitoringConfig {
            enable_metrics: false,
            enable_diagnostics: false,
            ..Default::default()
        });
        collector.record_attempt(attempt(true, 10));
        collector.record_diagnostic(diagnostic(Uuid::new_v4(), "x", 1, true));
        assert!(collector.attempts().is_empty());
        assert!(collector.diagnostics().is_empty());
    }

    #[test]
    fn test_empty_summary() {
        let s = ParsingMetricsCollector::default().summary();
        assert_eq!(s.total_attempts, 0);
        assert_eq!(s.success_rate, 0.0);
        assert!(s.stages.is_empty());
    }
}
