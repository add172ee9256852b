//! Tool-call metrics.
//!
//! The registry records a call count, error count, and duration stats for
//! every dispatched tool. Mutation takes a coarse lock; readers take a
//! snapshot and tolerate slightly stale values.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Metrics for a single tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetrics {
    pub call_count: u64,
    pub error_count: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self {
            call_count: 0,
            error_count: 0,
            total_duration_ms: 0.0,
            min_duration_ms: f64::INFINITY,
            max_duration_ms: 0.0,
        }
    }
}

impl ToolMetrics {
    fn record(&mut self, duration_ms: f64, is_error: bool) {
        self.call_count += 1;
        self.total_duration_ms += duration_ms;
        self.min_duration_ms = self.min_duration_ms.min(duration_ms);
        self.max_duration_ms = self.max_duration_ms.max(duration_ms);
        if is_error {
            self.error_count += 1;
        }
    }

    /// Average duration per call in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.total_duration_ms / self.call_count as f64
    }

    /// Fraction of calls that returned an error envelope.
    pub fn error_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.call_count as f64
    }
}

/// Collects metrics across all tools for one process run.
#[derive(Default)]
pub struct MetricsCollector {
    metrics: Mutex<HashMap<String, ToolMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one tool call.
    pub fn record(&self, tool_name: &str, duration_ms: f64, is_error: bool) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics
            .entry(tool_name.to_string())
            .or_default()
            .record(duration_ms, is_error);
    }

    /// Snapshot of all per-tool metrics.
    pub fn snapshot(&self) -> HashMap<String, ToolMetrics> {
        self.metrics.lock().expect("metrics lock poisoned").clone()
    }

    /// Aggregate summary for the session log.
    pub fn summary(&self) -> MetricsSummary {
        let metrics = self.metrics.lock().expect("metrics lock poisoned");
        let total_calls = metrics.values().map(|m| m.call_count).sum();
        let total_errors = metrics.values().map(|m| m.error_count).sum();
        MetricsSummary {
            total_calls,
            total_errors,
            tools_used: metrics.len(),
        }
    }

    /// Reset all counters (tournament mode reuses the process).
    pub fn reset(&self) {
        self.metrics.lock().expect("metrics lock poisoned").clear();
    }
}

/// Aggregate counters across all tools.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSummary {
    pub total_calls: u64,
    pub total_errors: u64,
    pub tools_used: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let collector = MetricsCollector::new();
        collector.record("search_exa", 120.0, false);
        collector.record("search_exa", 80.0, true);
        collector.record("wikipedia", 40.0, false);

        let snapshot = collector.snapshot();
        let exa = &snapshot["search_exa"];
        assert_eq!(exa.call_count, 2);
        assert_eq!(exa.error_count, 1);
        assert_eq!(exa.avg_duration_ms(), 100.0);
        assert_eq!(exa.min_duration_ms, 80.0);
        assert_eq!(exa.max_duration_ms, 120.0);
        assert_eq!(exa.error_rate(), 0.5);

        let summary = collector.summary();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.tools_used, 2);
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.record("notes", 5.0, false);
        collector.reset();
        assert_eq!(collector.summary().total_calls, 0);
    }

    #[test]
    fn test_empty_metrics() {
        let m = ToolMetrics::default();
        assert_eq!(m.avg_duration_ms(), 0.0);
        assert_eq!(m.error_rate(), 0.0);
    }
}
