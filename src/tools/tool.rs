//! The tool capability interface.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::pipeline::types::{Action, OrganizeAction};

/// Every tool the executor can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ApplyLabel,
    Archive,
    SendResponse,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyLabel => "apply_label",
            Self::Archive => "archive",
            Self::SendResponse => "send_response",
        }
    }

    /// The tool that carries out `action`.
    pub fn for_action(action: &Action) -> Self {
        match action {
            Action::Classify { .. } => Self::ApplyLabel,
            Action::Organize {
                action: OrganizeAction::ApplyLabel,
                ..
            } => Self::ApplyLabel,
            Action::Organize {
                action: OrganizeAction::Archive,
                ..
            } => Self::Archive,
            Action::Respond { .. } => Self::SendResponse,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed tool input; each variant belongs to exactly one `ToolKind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolInput {
    ApplyLabel { record_id: String, label: String },
    Archive { record_id: String },
    SendResponse { record_id: String, body: String, intent: String },
}

impl ToolInput {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::ApplyLabel { .. } => ToolKind::ApplyLabel,
            Self::Archive { .. } => ToolKind::Archive,
            Self::SendResponse { .. } => ToolKind::SendResponse,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            Self::ApplyLabel { record_id, .. }
            | Self::Archive { record_id }
            | Self::SendResponse { record_id, .. } => record_id,
        }
    }

    /// Build the input for a planned action. Classifications become a
    /// `category:<name>` label.
    pub fn from_action(record_id: &str, action: &Action) -> Result<Self, ToolError> {
        let record_id = record_id.to_string();
        match action {
            Action::Classify { category, .. } => Ok(Self::ApplyLabel {
                record_id,
                label: format!("category:{category}"),
            }),
            Action::Organize {
                action: OrganizeAction::ApplyLabel,
                target,
            } => match target {
                Some(label) if !label.is_empty() => Ok(Self::ApplyLabel {
                    record_id,
                    label: label.clone(),
                }),
                _ => Err(ToolError::InvalidInput {
                    tool: ToolKind::ApplyLabel.to_string(),
                    reason: "organize action without a label".into(),
                }),
            },
            Action::Organize {
                action: OrganizeAction::Archive,
                ..
            } => Ok(Self::Archive { record_id }),
            Action::Respond { text, intent } => Ok(Self::SendResponse {
                record_id,
                body: text.clone(),
                intent: intent.clone(),
            }),
        }
    }
}

/// What a tool reports back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub summary: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn text(summary: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            summary: summary.into(),
            elapsed,
        }
    }
}

/// One concrete capability, registered under its `ToolKind`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn description(&self) -> &str {
        self.kind().as_str()
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError>;
}
