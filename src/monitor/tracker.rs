//! The performance monitor: in-flight operations, metric buffers and
//! per-owner counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::monitor::buffer::RingBuffer;
use crate::monitor::metrics::{
    AgentStats, Alert, MetricKind, OperationMetric, OperationSummary, PerformanceSnapshot,
    RealTimeStats,
};
use crate::monitor::report::{PerformanceReport, ReportThresholds, ReportWindow, build_report};

struct ActiveOperation {
    owner: String,
    operation_type: String,
    started: Instant,
    context: serde_json::Value,
}

/// Tracks operation latency and success per owner.
///
/// Writers hold each lock only long enough to push or bump a counter.
/// Readers copy what they need under the lock and aggregate afterwards.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    active: Mutex<HashMap<String, ActiveOperation>>,
    metrics: RwLock<RingBuffer<OperationMetric>>,
    snapshots: RwLock<RingBuffer<PerformanceSnapshot>>,
    agents: RwLock<HashMap<String, AgentStats>>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let capacity = config.buffer_capacity;
        Self {
            config,
            active: Mutex::new(HashMap::new()),
            metrics: RwLock::new(RingBuffer::new(capacity)),
            snapshots: RwLock::new(RingBuffer::new(capacity)),
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Begin timing an operation. Reusing `op_id` replaces the earlier one.
    pub fn start_operation(
        &self,
        op_id: impl Into<String>,
        owner: &str,
        operation_type: &str,
        context: serde_json::Value,
    ) {
        let op_id = op_id.into();
        debug!(op_id = %op_id, owner, operation_type, "Operation started");
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(
            op_id,
            ActiveOperation {
                owner: owner.to_string(),
                operation_type: operation_type.to_string(),
                started: Instant::now(),
                context,
            },
        );
    }

    /// Finish a started operation and record its metric.
    ///
    /// Returns `None` (with a warning) for an unknown `op_id`.
    pub fn end_operation(
        &self,
        op_id: &str,
        success: bool,
        result_data: Option<serde_json::Value>,
        error_info: Option<&str>,
    ) -> Option<OperationSummary> {
        let op = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(op_id)
        };
        let Some(op) = op else {
            warn!(op_id, "Operation not found in active operations");
            return None;
        };

        let mut context = serde_json::json!({ "context": op.context });
        if let Some(result) = result_data {
            context["result_data"] = result;
        }
        Some(self.finish(
            &op.owner,
            &op.operation_type,
            op.started.elapsed(),
            success,
            error_info,
            context,
        ))
    }

    /// Record an operation whose duration was measured elsewhere.
    pub fn record_operation(
        &self,
        owner: &str,
        operation_type: &str,
        duration: Duration,
        success: bool,
        error: Option<&str>,
    ) -> OperationSummary {
        self.finish(
            owner,
            operation_type,
            duration,
            success,
            error,
            serde_json::Value::Null,
        )
    }

    fn finish(
        &self,
        owner: &str,
        operation_type: &str,
        duration: Duration,
        success: bool,
        error: Option<&str>,
        context: serde_json::Value,
    ) -> OperationSummary {
        let seconds = duration.as_secs_f64();

        let mut metric = OperationMetric::new(MetricKind::OperationExecutionTime, owner, seconds);
        metric.operation_type = Some(operation_type.to_string());
        metric.success = Some(success);
        metric.error = error.map(str::to_string);
        metric.context = context;
        self.push_metric(metric);

        let stats = {
            let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
            let stats = agents
                .entry(owner.to_string())
                .or_insert_with(|| AgentStats::new(owner));
            stats.record(duration, success, error);
            stats.clone()
        };

        let alerts = self.check_thresholds(&stats, seconds);
        for alert in &alerts {
            warn!(owner, operation_type, alert = %alert, "Performance threshold exceeded");
        }
        debug!(owner, operation_type, seconds, success, "Operation completed");

        OperationSummary {
            owner: owner.to_string(),
            operation_type: operation_type.to_string(),
            duration: seconds,
            success,
            alerts,
        }
    }

    fn check_thresholds(&self, stats: &AgentStats, seconds: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if seconds > self.config.max_execution_time.as_secs_f64() {
            alerts.push(Alert::SlowOperation {
                owner: stats.owner.clone(),
                seconds,
            });
        }
        if stats.total_ops >= self.config.min_ops_for_success_alert {
            let rate = stats.success_rate();
            if rate < self.config.min_success_rate {
                alerts.push(Alert::LowSuccessRate {
                    owner: stats.owner.clone(),
                    rate,
                });
            }
        }
        alerts
    }

    fn push_metric(&self, metric: OperationMetric) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.push(metric);
    }

    // ── Tools and memory ────────────────────────────────────────────

    pub fn record_tool_usage(&self, owner: &str, tool: &str, duration: Duration, success: bool) {
        {
            let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
            let stats = agents
                .entry(owner.to_string())
                .or_insert_with(|| AgentStats::new(owner));
            *stats.tool_usage.entry(tool.to_string()).or_insert(0) += 1;
        }

        let mut metric =
            OperationMetric::new(MetricKind::ToolExecutionTime, owner, duration.as_secs_f64());
        metric.tool_name = Some(tool.to_string());
        metric.success = Some(success);
        self.push_metric(metric);
    }

    /// Record memory usage in megabytes, keyed by component.
    pub fn record_memory_usage(&self, owner: &str, stats: BTreeMap<String, u64>) -> Option<Alert> {
        let total: u64 = stats.values().sum();
        let mut metric = OperationMetric::new(MetricKind::MemoryUsage, owner, total as f64);
        metric.context = serde_json::to_value(&stats).unwrap_or_default();
        self.push_metric(metric);

        if total > self.config.max_memory_mb {
            let alert = Alert::HighMemory {
                owner: owner.to_string(),
                megabytes: total,
            };
            warn!(owner, alert = %alert, "Performance threshold exceeded");
            Some(alert)
        } else {
            None
        }
    }

    // ── Readers ─────────────────────────────────────────────────────

    pub fn agent_stats(&self, owner: &str) -> Option<AgentStats> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(owner).cloned()
    }

    /// Copy of the metric buffer, oldest first.
    pub fn metrics(&self) -> Vec<OperationMetric> {
        let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
        metrics.copy_where(|_| true)
    }

    /// Aggregate an owner's counters and store the result.
    pub fn snapshot(&self, owner: &str) -> PerformanceSnapshot {
        let stats = self
            .agent_stats(owner)
            .unwrap_or_else(|| AgentStats::new(owner));

        let minute_ago = Utc::now() - chrono::Duration::minutes(1);
        let (ops_last_minute, memory_usage) = {
            let metrics = self.metrics.read().unwrap_or_else(|e| e.into_inner());
            let ops = metrics
                .iter()
                .filter(|m| {
                    m.owner == owner
                        && m.kind == MetricKind::OperationExecutionTime
                        && m.timestamp >= minute_ago
                })
                .count();
            let memory = metrics
                .iter()
                .rev()
                .find(|m| m.owner == owner && m.kind == MetricKind::MemoryUsage)
                .map(|m| m.context.clone());
            (ops, memory)
        };

        let memory_usage: BTreeMap<String, u64> = memory_usage
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| BTreeMap::from([("total".to_string(), 0)]));

        let mut metrics = BTreeMap::new();
        metrics.insert("total_operations".to_string(), stats.total_ops as f64);
        metrics.insert("success_rate".to_string(), stats.success_rate());
        metrics.insert(
            "average_execution_time".to_string(),
            stats.average_execution_time(),
        );
        metrics.insert("operations_per_minute".to_string(), ops_last_minute as f64);

        let snapshot = PerformanceSnapshot {
            owner: owner.to_string(),
            timestamp: Utc::now(),
            metrics,
            memory_usage,
            tool_usage_stats: stats.tool_usage.clone(),
            error_count: stats.fail_ops,
            success_rate: stats.success_rate(),
        };

        let mut snapshots = self.snapshots.write().unwrap_or_else(|e| e.into_inner());
        snapshots.push(snapshot.clone());
        snapshot
    }

    /// Report over the given window, optionally for one owner.
    pub fn report(&self, owner: Option<&str>, window: ReportWindow) -> PerformanceReport {
        let cutoff = Utc::now() - window.duration();
        let in_scope = |ts: &chrono::DateTime<Utc>, who: &str| {
            *ts >= cutoff && owner.is_none_or(|o| o == who)
        };

        let metrics = {
            let buf = self.metrics.read().unwrap_or_else(|e| e.into_inner());
            buf.copy_where(|m| in_scope(&m.timestamp, &m.owner))
        };
        let snapshot_count = {
            let buf = self.snapshots.read().unwrap_or_else(|e| e.into_inner());
            buf.iter()
                .filter(|s| in_scope(&s.timestamp, &s.owner))
                .count()
        };

        build_report(
            window,
            &metrics,
            snapshot_count,
            ReportThresholds {
                max_error_rate: self.config.max_error_rate,
                bottleneck_secs: self.config.bottleneck_threshold.as_secs_f64(),
            },
        )
    }

    pub fn real_time_stats(&self) -> RealTimeStats {
        let active_operations = self.active.lock().unwrap_or_else(|e| e.into_inner()).len();
        let total_metrics_collected = self.metrics.read().unwrap_or_else(|e| e.into_inner()).len();
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        RealTimeStats {
            active_operations,
            total_metrics_collected,
            owners_monitored: agents.len(),
            operations_by_owner: agents
                .iter()
                .map(|(owner, stats)| (owner.clone(), stats.total_ops))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::report::Trend;
    use serde_json::json;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(MonitorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_alerts_but_is_recorded() {
        let mon = monitor();
        mon.start_operation("op-1", "classifier", "analyze", json!({}));
        tokio::time::advance(Duration::from_secs(35)).await;
        let summary = mon.end_operation("op-1", true, None, None).unwrap();

        assert!(matches!(summary.alerts.as_slice(), [Alert::SlowOperation { .. }]));
        assert_eq!(mon.metrics().len(), 1);
        assert!(summary.duration >= 35.0);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_operation_does_not_alert() {
        let mon = monitor();
        mon.start_operation("op-1", "classifier", "analyze", json!({}));
        tokio::time::advance(Duration::from_secs(12)).await;
        let summary = mon.end_operation("op-1", true, Some(json!({"n": 3})), None).unwrap();

        assert!(summary.alerts.is_empty());
        assert_eq!(mon.metrics()[0].context["result_data"]["n"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reused_op_id_overwrites() {
        let mon = monitor();
        mon.start_operation("op", "a", "first", json!({}));
        tokio::time::advance(Duration::from_secs(50)).await;
        mon.start_operation("op", "b", "second", json!({}));
        let summary = mon.end_operation("op", true, None, None).unwrap();
        assert_eq!(summary.owner, "b");
        assert!(summary.alerts.is_empty());
        assert!(mon.end_operation("op", true, None, None).is_none());
    }

    #[test]
    fn unknown_operation_returns_none() {
        let mon = monitor();
        assert!(mon.end_operation("missing", true, None, None).is_none());
        assert!(mon.metrics().is_empty());
    }

    #[test]
    fn low_success_rate_alerts_after_ten_ops() {
        let mon = monitor();
        for _ in 0..8 {
            let s = mon.record_operation("executor", "apply", Duration::from_millis(10), false, Some("rejected"));
            assert!(s.alerts.is_empty());
        }
        mon.record_operation("executor", "apply", Duration::from_millis(10), true, None);
        let s = mon.record_operation("executor", "apply", Duration::from_millis(10), true, None);
        assert!(matches!(s.alerts.as_slice(), [Alert::LowSuccessRate { .. }]));

        let stats = mon.agent_stats("executor").unwrap();
        assert_eq!(stats.error_types.get("rejected"), Some(&8));
    }

    #[test]
    fn metric_buffer_is_fifo() {
        let mon = monitor();
        for i in 1..=1001u64 {
            mon.record_operation("a", &format!("op{i}"), Duration::from_millis(i), true, None);
        }
        let metrics = mon.metrics();
        assert_eq!(metrics.len(), 1000);
        assert_eq!(metrics[0].operation_type.as_deref(), Some("op2"));
    }

    #[test]
    fn snapshot_aggregates_owner() {
        let mon = monitor();
        mon.record_operation("organizer", "analyze", Duration::from_secs(2), true, None);
        mon.record_operation("organizer", "analyze", Duration::from_secs(4), false, Some("timeout"));
        mon.record_tool_usage("organizer", "archive", Duration::from_millis(5), true);
        mon.record_memory_usage(
            "organizer",
            BTreeMap::from([("cache".to_string(), 20), ("events".to_string(), 5)]),
        );

        let snap = mon.snapshot("organizer");
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.success_rate, 0.5);
        assert_eq!(snap.metrics["average_execution_time"], 3.0);
        assert_eq!(snap.metrics["operations_per_minute"], 2.0);
        assert_eq!(snap.memory_usage.get("cache"), Some(&20));
        assert_eq!(snap.tool_usage_stats.get("archive"), Some(&1));

        let report = mon.report(Some("organizer"), ReportWindow::Short);
        assert_eq!(report.snapshots_analyzed, 1);
    }

    #[test]
    fn memory_threshold_alerts() {
        let mon = monitor();
        assert!(mon
            .record_memory_usage("a", BTreeMap::from([("total".to_string(), 150)]))
            .is_some());
        assert!(mon
            .record_memory_usage("a", BTreeMap::from([("total".to_string(), 50)]))
            .is_none());
    }

    #[test]
    fn report_filters_by_owner() {
        let mon = monitor();
        for _ in 0..12 {
            mon.record_operation("classifier", "analyze", Duration::from_secs(1), true, None);
        }
        mon.record_operation("responder", "analyze", Duration::from_secs(1), false, Some("timeout"));
        mon.record_tool_usage("executor", "send_response", Duration::from_secs(6), true);

        let all = mon.report(None, ReportWindow::Medium);
        assert_eq!(all.owners.len(), 2);
        assert_eq!(all.bottlenecks.len(), 1);
        assert!(matches!(all.trend, Trend::Measured { .. }));

        let one = mon.report(Some("responder"), ReportWindow::Medium);
        assert_eq!(one.metrics_analyzed, 1);
        assert_eq!(one.trend, Trend::InsufficientData);
        assert!(!one.owners["responder"].within_error_budget);

        let stats = mon.real_time_stats();
        assert_eq!(stats.owners_monitored, 3);
        assert_eq!(stats.operations_by_owner["classifier"], 12);
    }
}
