//! Windowed performance reports: per-owner latency, trend, bottlenecks and
//! recommendations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ConfigError;
use crate::monitor::metrics::{MetricKind, OperationMetric};

/// Minimum operation samples before a trend is reported.
const MIN_TREND_SAMPLES: usize = 10;
/// Mean operation latency (seconds) above which caching is suggested.
const SLOW_AVERAGE_SECS: f64 = 10.0;
/// Failure share above which error handling is flagged.
const HIGH_ERROR_SHARE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportWindow {
    /// 5 minutes.
    Short,
    /// 1 hour.
    #[default]
    Medium,
    /// 24 hours.
    Long,
}

impl ReportWindow {
    pub fn duration(&self) -> chrono::Duration {
        match self {
            Self::Short => chrono::Duration::minutes(5),
            Self::Medium => chrono::Duration::hours(1),
            Self::Long => chrono::Duration::hours(24),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            other => Err(ConfigError::InvalidValue {
                key: "report_window".into(),
                message: format!("unknown window '{other}'"),
            }),
        }
    }
}

/// Latency and reliability of one owner inside the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerPerformance {
    pub total_operations: usize,
    pub average_execution_time: f64,
    pub min_execution_time: f64,
    pub max_execution_time: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Error rate at or below the configured maximum.
    pub within_error_budget: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Degrading,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Trend {
    InsufficientData,
    Measured {
        direction: TrendDirection,
        /// `|second - first| / first`, 0 when the first half averages 0.
        magnitude: f64,
        first_period_avg: f64,
        second_period_avg: f64,
    },
}

/// A tool whose mean execution time exceeds the bottleneck threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub tool_name: String,
    pub average_execution_time: f64,
    pub usage_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub window: ReportWindow,
    pub generated_at: DateTime<Utc>,
    pub metrics_analyzed: usize,
    pub snapshots_analyzed: usize,
    pub owners: BTreeMap<String, OwnerPerformance>,
    pub trend: Trend,
    pub bottlenecks: Vec<Bottleneck>,
    pub recommendations: Vec<String>,
}

/// Thresholds the report is judged against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReportThresholds {
    pub max_error_rate: f64,
    pub bottleneck_secs: f64,
}

pub(crate) fn build_report(
    window: ReportWindow,
    metrics: &[OperationMetric],
    snapshots_analyzed: usize,
    thresholds: ReportThresholds,
) -> PerformanceReport {
    PerformanceReport {
        window,
        generated_at: Utc::now(),
        metrics_analyzed: metrics.len(),
        snapshots_analyzed,
        owners: owner_performance(metrics, thresholds.max_error_rate),
        trend: trend(metrics),
        bottlenecks: bottlenecks(metrics, thresholds.bottleneck_secs),
        recommendations: recommendations(metrics),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn operations(metrics: &[OperationMetric]) -> impl Iterator<Item = &OperationMetric> {
    metrics
        .iter()
        .filter(|m| m.kind == MetricKind::OperationExecutionTime)
}

fn owner_performance(
    metrics: &[OperationMetric],
    max_error_rate: f64,
) -> BTreeMap<String, OwnerPerformance> {
    let mut by_owner: BTreeMap<&str, Vec<&OperationMetric>> = BTreeMap::new();
    for metric in operations(metrics) {
        by_owner.entry(metric.owner.as_str()).or_default().push(metric);
    }

    by_owner
        .into_iter()
        .map(|(owner, ops)| {
            let times: Vec<f64> = ops.iter().map(|m| m.value).collect();
            let successes = ops.iter().filter(|m| m.success == Some(true)).count();
            let success_rate = successes as f64 / ops.len() as f64;
            let error_rate = 1.0 - success_rate;
            let perf = OwnerPerformance {
                total_operations: ops.len(),
                average_execution_time: mean(&times),
                min_execution_time: times.iter().copied().fold(f64::INFINITY, f64::min),
                max_execution_time: times.iter().copied().fold(0.0, f64::max),
                success_rate,
                error_rate,
                within_error_budget: error_rate <= max_error_rate,
            };
            (owner.to_string(), perf)
        })
        .collect()
}

/// Compare mean operation latency of the older and newer halves.
pub(crate) fn trend(metrics: &[OperationMetric]) -> Trend {
    let mut ops: Vec<&OperationMetric> = operations(metrics).collect();
    if ops.len() < MIN_TREND_SAMPLES {
        return Trend::InsufficientData;
    }
    ops.sort_by_key(|m| m.timestamp);

    let mid = ops.len() / 2;
    let first: Vec<f64> = ops[..mid].iter().map(|m| m.value).collect();
    let second: Vec<f64> = ops[mid..].iter().map(|m| m.value).collect();
    let first_avg = mean(&first);
    let second_avg = mean(&second);

    let direction = if second_avg < first_avg {
        TrendDirection::Improving
    } else {
        TrendDirection::Degrading
    };
    let magnitude = if first_avg > 0.0 {
        (second_avg - first_avg).abs() / first_avg
    } else {
        0.0
    };

    Trend::Measured {
        direction,
        magnitude,
        first_period_avg: first_avg,
        second_period_avg: second_avg,
    }
}

fn tool_times(metrics: &[OperationMetric]) -> BTreeMap<&str, Vec<f64>> {
    let mut by_tool: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for metric in metrics
        .iter()
        .filter(|m| m.kind == MetricKind::ToolExecutionTime)
    {
        let tool = metric.tool_name.as_deref().unwrap_or("unknown");
        by_tool.entry(tool).or_default().push(metric.value);
    }
    by_tool
}

pub(crate) fn bottlenecks(metrics: &[OperationMetric], threshold_secs: f64) -> Vec<Bottleneck> {
    tool_times(metrics)
        .into_iter()
        .filter_map(|(tool, times)| {
            let avg = mean(&times);
            (avg > threshold_secs).then(|| Bottleneck {
                tool_name: tool.to_string(),
                average_execution_time: avg,
                usage_count: times.len(),
            })
        })
        .collect()
}

pub(crate) fn recommendations(metrics: &[OperationMetric]) -> Vec<String> {
    if metrics.is_empty() {
        return vec!["Insufficient data for recommendations".to_string()];
    }

    let mut out = Vec::new();

    let op_times: Vec<f64> = operations(metrics).map(|m| m.value).collect();
    if !op_times.is_empty() && mean(&op_times) > SLOW_AVERAGE_SECS {
        out.push("Consider optimizing slow operations or implementing caching".to_string());
    }

    // Ties go to the alphabetically first tool.
    let most_used = tool_times(metrics)
        .into_iter()
        .map(|(tool, times)| (tool, times.len()))
        .fold(None::<(&str, usize)>, |best, (tool, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((tool, count)),
        });
    if let Some((tool, _)) = most_used {
        out.push(format!("Most used tool is '{tool}' - consider optimizing it"));
    }

    let failures = metrics.iter().filter(|m| m.is_failure()).count();
    if failures as f64 > metrics.len() as f64 * HIGH_ERROR_SHARE {
        out.push("High error rate detected - review error handling and robustness".to_string());
    }

    if out.is_empty() {
        out.push("Performance is within acceptable ranges".to_string());
    }
    out
}
