//! Performance monitoring: bounded metric buffers, per-owner counters,
//! snapshots and windowed reports.

pub mod buffer;
pub mod metrics;
pub mod report;
pub mod tracker;

pub use buffer::RingBuffer;
pub use metrics::{
    AgentStats, Alert, MetricKind, OperationMetric, OperationSummary, PerformanceSnapshot,
    RealTimeStats,
};
pub use report::{Bottleneck, OwnerPerformance, PerformanceReport, ReportWindow, Trend, TrendDirection};
pub use tracker::PerformanceMonitor;
