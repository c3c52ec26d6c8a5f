//! Records, analysis results, planned actions and the collaborator traits
//! the orchestrator drives.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, ExecutorError, SourceError};

// ── Records ─────────────────────────────────────────────────────────

/// One item of a batch (an email, in practice).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_important: bool,
}

impl Record {
    pub fn new(id: impl Into<String>, sender: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: String::new(),
            sender: sender.into(),
            timestamp: Utc::now(),
            labels: BTreeSet::new(),
            is_read: false,
            is_important: false,
        }
    }
}

// ── Analysis results ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub record_id: String,
    pub category: Option<String>,
    pub priority_score: Option<f64>,
    pub sentiment: Option<String>,
    /// Keywords the classifier keyed on; learned against on correction.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub confidence: f64,
}

impl ClassificationResult {
    /// A classification only becomes an action when it names a category.
    pub fn planned_action(&self) -> Option<PlannedAction> {
        let category = self.category.clone()?;
        Some(PlannedAction {
            record_id: self.record_id.clone(),
            action: Action::Classify {
                category,
                priority_score: self.priority_score,
            },
            confidence: self.confidence,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizeAction {
    ApplyLabel,
    Archive,
}

impl OrganizeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyLabel => "apply_label",
            Self::Archive => "archive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationResult {
    pub record_id: String,
    pub suggested_action: OrganizeAction,
    /// Label name for `ApplyLabel`.
    pub target: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCandidate {
    pub record_id: String,
    pub response_text: String,
    pub intent: String,
    /// Tone the text was written in, e.g. `formal`.
    #[serde(default)]
    pub style: Option<String>,
    pub confidence: f64,
}

// ── Collaborators ───────────────────────────────────────────────────

/// Where batches come from.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_batch(&self, limit: usize) -> Result<Vec<Record>, SourceError>;
}

/// An independent analysis routine run over a whole batch.
#[async_trait]
pub trait Analyzer: Send + Sync {
    type Output: Send + 'static;

    async fn analyze(&self, records: &[Record]) -> Result<Vec<Self::Output>, AnalysisError>;
}

pub type Classifier = dyn Analyzer<Output = ClassificationResult>;
pub type Organizer = dyn Analyzer<Output = OrganizationResult>;
pub type Responder = dyn Analyzer<Output = ResponseCandidate>;

/// Applies approved actions to the outside world.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// `Ok(false)` means the backend declined without an error.
    async fn apply(&self, action: &PlannedAction) -> Result<bool, ExecutorError>;
}

// ── Branches ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Classification,
    Organization,
    Response,
}

impl Branch {
    pub const ALL: [Branch; 3] = [Self::Classification, Self::Organization, Self::Response];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Organization => "organization",
            Self::Response => "response",
        }
    }

    /// Owner name used for monitor bookkeeping.
    pub fn owner(&self) -> &'static str {
        match self {
            Self::Classification => "classifier",
            Self::Organization => "organizer",
            Self::Response => "responder",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Actions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Classify {
        category: String,
        priority_score: Option<f64>,
    },
    Organize {
        action: OrganizeAction,
        target: Option<String>,
    },
    Respond {
        text: String,
        intent: String,
    },
}

impl Action {
    /// Identity of the action within one record. Organization actions
    /// include their target so different labels do not collide.
    pub fn key(&self) -> String {
        match self {
            Self::Classify { .. } => "classify".to_string(),
            Self::Organize { action, target } => match target {
                Some(target) => format!("organize:{}:{target}", action.as_str()),
                None => format!("organize:{}", action.as_str()),
            },
            Self::Respond { .. } => "respond".to_string(),
        }
    }

    pub fn branch(&self) -> Branch {
        match self {
            Self::Classify { .. } => Branch::Classification,
            Self::Organize { .. } => Branch::Organization,
            Self::Respond { .. } => Branch::Response,
        }
    }
}

/// An action for one record, with the confidence it was proposed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub record_id: String,
    pub action: Action,
    pub confidence: f64,
}

impl PlannedAction {
    pub fn merge_key(&self) -> (String, String) {
        (self.record_id.clone(), self.action.key())
    }
}

impl From<&OrganizationResult> for PlannedAction {
    fn from(result: &OrganizationResult) -> Self {
        PlannedAction {
            record_id: result.record_id.clone(),
            action: Action::Organize {
                action: result.suggested_action,
                target: result.target.clone(),
            },
            confidence: result.confidence,
        }
    }
}

impl From<&ResponseCandidate> for PlannedAction {
    fn from(candidate: &ResponseCandidate) -> Self {
        PlannedAction {
            record_id: candidate.record_id.clone(),
            action: Action::Respond {
                text: candidate.response_text.clone(),
                intent: candidate.intent.clone(),
            },
            confidence: candidate.confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organize_keys_include_target() {
        let label = Action::Organize {
            action: OrganizeAction::ApplyLabel,
            target: Some("work".into()),
        };
        let archive = Action::Organize {
            action: OrganizeAction::Archive,
            target: None,
        };
        assert_eq!(label.key(), "organize:apply_label:work");
        assert_eq!(archive.key(), "organize:archive");
        assert_eq!(archive.branch(), Branch::Organization);
    }

    #[test]
    fn classification_without_category_plans_nothing() {
        let result = ClassificationResult {
            record_id: "r1".into(),
            category: None,
            priority_score: Some(4.0),
            sentiment: None,
            keywords: vec![],
            confidence: 0.9,
        };
        assert!(result.planned_action().is_none());
    }

    #[test]
    fn action_serializes_tagged() {
        let action = Action::Respond {
            text: "Thanks".into(),
            intent: "acknowledge".into(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "respond");
    }
}
