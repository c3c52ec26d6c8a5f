//! Error types for mailflow.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Record source error: {0}")]
    Source(#[from] SourceError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors. Every write path that hits this is best-effort.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// The record source could not produce a batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Record source unreachable: {0}")]
    Connectivity(String),

    #[error("Record source returned invalid data: {0}")]
    Invalid(String),
}

/// Failure of a single analysis branch. Never escalates past the branch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("Analyzer {branch} unreachable: {reason}")]
    Connectivity { branch: String, reason: String },

    #[error("Analyzer {branch} timed out after {timeout:?}")]
    Timeout { branch: String, timeout: Duration },

    #[error("Analyzer {branch} returned invalid output: {reason}")]
    Invalid { branch: String, reason: String },

    #[error("Analyzer {branch} panicked: {reason}")]
    Panicked { branch: String, reason: String },
}

impl AnalysisError {
    /// Short kind label used in reports and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "connectivity",
            Self::Timeout { .. } => "timeout",
            Self::Invalid { .. } => "invalid",
            Self::Panicked { .. } => "panicked",
        }
    }
}

/// Failure of a single planned action.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor unreachable: {0}")]
    Connectivity(String),

    #[error("Action rejected: {0}")]
    Rejected(String),

    /// The executor backend is gone entirely; no further action can succeed.
    #[error("Executor unavailable: {0}")]
    Unavailable(String),
}

impl ExecutorError {
    /// Whether this error stops the whole execution stage.
    pub fn is_catastrophic(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "connectivity",
            Self::Rejected(_) => "rejected",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<ToolError> for ExecutorError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotRegistered(_) | ToolError::InvalidInput { .. } => {
                Self::Rejected(e.to_string())
            }
            ToolError::Failed { .. } => Self::Connectivity(e.to_string()),
        }
    }
}

/// Malformed feedback. The feedback is dropped with a warning.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Unknown feedback kind: {0}")]
    UnknownKind(String),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

/// Tool invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("No tool registered for {0}")]
    NotRegistered(String),

    #[error("Invalid input for tool {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}

/// Orchestrator-level errors. Only these surface out of a cycle.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Catastrophic failure during {stage}: {reason}")]
    Catastrophic { stage: String, reason: String },

    #[error("Orchestrator halted after a catastrophic failure")]
    Halted,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
