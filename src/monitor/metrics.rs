//! Metric records, per-owner counters and alerts.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    OperationExecutionTime,
    ToolExecutionTime,
    /// Value is in megabytes rather than seconds.
    MemoryUsage,
}

/// One measurement in the metrics ring buffer.
#[derive(Debug, Clone, Serialize)]
pub struct OperationMetric {
    pub kind: MetricKind,
    /// Seconds for timings, megabytes for memory usage.
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub owner: String,
    pub operation_type: Option<String>,
    pub tool_name: Option<String>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub context: serde_json::Value,
}

impl OperationMetric {
    pub(crate) fn new(kind: MetricKind, owner: &str, value: f64) -> Self {
        Self {
            kind,
            value,
            timestamp: Utc::now(),
            owner: owner.to_string(),
            operation_type: None,
            tool_name: None,
            success: None,
            error: None,
            context: serde_json::Value::Null,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.success == Some(false)
    }
}

/// Cumulative counters for one owner. Never reset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub owner: String,
    pub total_ops: u64,
    pub success_ops: u64,
    pub fail_ops: u64,
    /// Seconds.
    pub total_time: f64,
    pub tool_usage: BTreeMap<String, u64>,
    pub error_types: BTreeMap<String, u64>,
}

impl AgentStats {
    pub(crate) fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ..Self::default()
        }
    }

    /// 1.0 before the first operation.
    pub fn success_rate(&self) -> f64 {
        if self.total_ops == 0 {
            1.0
        } else {
            self.success_ops as f64 / self.total_ops as f64
        }
    }

    pub fn average_execution_time(&self) -> f64 {
        if self.total_ops == 0 {
            0.0
        } else {
            self.total_time / self.total_ops as f64
        }
    }

    pub(crate) fn record(&mut self, duration: Duration, success: bool, error: Option<&str>) {
        self.total_ops += 1;
        self.total_time += duration.as_secs_f64();
        if success {
            self.success_ops += 1;
        } else {
            self.fail_ops += 1;
            if let Some(error) = error {
                *self.error_types.entry(error.to_string()).or_insert(0) += 1;
            }
        }
    }
}

/// Point-in-time aggregate for one owner.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub owner: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub memory_usage: BTreeMap<String, u64>,
    pub tool_usage_stats: BTreeMap<String, u64>,
    pub error_count: u64,
    pub success_rate: f64,
}

/// A threshold breach. Logged and returned, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    SlowOperation { owner: String, seconds: f64 },
    LowSuccessRate { owner: String, rate: f64 },
    HighMemory { owner: String, megabytes: u64 },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlowOperation { owner, seconds } => {
                write!(f, "Slow operation for {owner}: {seconds:.2}s")
            }
            Self::LowSuccessRate { owner, rate } => {
                write!(f, "Low success rate for {owner}: {rate:.2}")
            }
            Self::HighMemory { owner, megabytes } => {
                write!(f, "High memory usage for {owner}: {megabytes}MB")
            }
        }
    }
}

/// Result of closing an operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub owner: String,
    pub operation_type: String,
    /// Seconds.
    pub duration: f64,
    pub success: bool,
    pub alerts: Vec<Alert>,
}

/// Cheap live counters.
#[derive(Debug, Clone, Serialize)]
pub struct RealTimeStats {
    pub active_operations: usize,
    pub total_metrics_collected: usize,
    pub owners_monitored: usize,
    pub operations_by_owner: BTreeMap<String, u64>,
}
