//! Configuration types.
//!
//! Loaded once per process and passed down explicitly. Every section has a
//! `Default` carrying the production constants; `AppConfig::from_env()` lets
//! `MAILFLOW_*` variables override individual fields.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Orchestrator cycle configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Minimum confidence for a classification to be applied without approval.
    pub classification_threshold: f64,
    /// Minimum confidence for a response to be sent without approval.
    pub response_threshold: f64,
    /// Organization actions skip the confidence check when set.
    pub auto_organize: bool,
    /// Maximum records pulled from the source per cycle.
    pub batch_size: usize,
    /// Deadline for each analysis branch.
    pub branch_timeout: Duration,
    /// Concurrent analysis slots.
    pub worker_pool_size: usize,
    /// Pause between cycles when running the periodic loop.
    pub cycle_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            classification_threshold: 0.7,
            response_threshold: 0.8,
            auto_organize: true,
            batch_size: 20,
            branch_timeout: Duration::from_secs(30),
            worker_pool_size: 3,
            cycle_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Performance monitor thresholds and buffer sizes.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Capacity of the metric and snapshot ring buffers.
    pub buffer_capacity: usize,
    /// Operations slower than this raise a slow-operation alert.
    pub max_execution_time: Duration,
    /// Owners below this success rate raise an alert.
    pub min_success_rate: f64,
    /// Error budget used by reports.
    pub max_error_rate: f64,
    /// Memory usage alert threshold in MB.
    pub max_memory_mb: u64,
    /// Tools slower than this on average are reported as bottlenecks.
    pub bottleneck_threshold: Duration,
    /// Operations an owner needs before the success-rate alert is evaluated.
    pub min_ops_for_success_alert: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            max_execution_time: Duration::from_secs(30),
            min_success_rate: 0.85,
            max_error_rate: 0.15,
            max_memory_mb: 100,
            bottleneck_threshold: Duration::from_secs(5),
            min_ops_for_success_alert: 10,
        }
    }
}

/// Event cache configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum events held in the recent cache.
    pub recent_cache_capacity: usize,
    /// Events older than this are pruned from the cache (durable copy stays).
    pub recent_window: chrono::Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_cache_capacity: 1000,
            recent_window: chrono::Duration::days(7),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Write a daily-rolling log file here in addition to stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub orchestrator: OrchestratorConfig,
    pub monitor: MonitorConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/mailflow.db"),
            orchestrator: OrchestratorConfig::default(),
            monitor: MonitorConfig::default(),
            memory: MemoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build from the process environment. Unparsable values keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<f64>().ok());
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let mut config = Self::default();

        if let Some(path) = lookup("MAILFLOW_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }

        let orch = &mut config.orchestrator;
        if let Some(v) = parse_f64("MAILFLOW_CLASSIFICATION_THRESHOLD") {
            orch.classification_threshold = v;
        }
        if let Some(v) = parse_f64("MAILFLOW_RESPONSE_THRESHOLD") {
            orch.response_threshold = v;
        }
        if let Some(v) = lookup("MAILFLOW_AUTO_ORGANIZE").and_then(|s| parse_bool(&s)) {
            orch.auto_organize = v;
        }
        if let Some(v) = parse_u64("MAILFLOW_BATCH_SIZE") {
            orch.batch_size = v as usize;
        }
        if let Some(v) = parse_u64("MAILFLOW_BRANCH_TIMEOUT_SECS") {
            orch.branch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_u64("MAILFLOW_POOL_SIZE") {
            orch.worker_pool_size = v as usize;
        }
        if let Some(v) = parse_u64("MAILFLOW_CYCLE_INTERVAL_SECS") {
            orch.cycle_interval = Duration::from_secs(v);
        }

        let mon = &mut config.monitor;
        if let Some(v) = parse_u64("MAILFLOW_MAX_EXECUTION_SECS") {
            mon.max_execution_time = Duration::from_secs(v);
        }
        if let Some(v) = parse_f64("MAILFLOW_MIN_SUCCESS_RATE") {
            mon.min_success_rate = v;
        }
        if let Some(v) = parse_f64("MAILFLOW_MAX_ERROR_RATE") {
            mon.max_error_rate = v;
        }

        if let Some(level) = lookup("MAILFLOW_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(dir) = lookup("MAILFLOW_LOG_DIR") {
            config.logging.directory = Some(PathBuf::from(dir));
        }

        config
    }

    /// Reject values that would make the orchestrator or monitor misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = [
            (
                "classification_threshold",
                self.orchestrator.classification_threshold,
            ),
            ("response_threshold", self.orchestrator.response_threshold),
            ("min_success_rate", self.monitor.min_success_rate),
            ("max_error_rate", self.monitor.max_error_rate),
        ];
        for (key, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{value} is outside [0, 1]"),
                });
            }
        }

        let non_zero = [
            ("batch_size", self.orchestrator.batch_size),
            ("worker_pool_size", self.orchestrator.worker_pool_size),
            ("buffer_capacity", self.monitor.buffer_capacity),
            ("recent_cache_capacity", self.memory.recent_cache_capacity),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
