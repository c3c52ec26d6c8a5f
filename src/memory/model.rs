//! Event, feedback and preference records.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FeedbackError;

// ── Events ──────────────────────────────────────────────────────────

/// An immutable, timestamped record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique, creation-ordered ID (UUIDv7).
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Free-form type tag, e.g. `workflow_execution`.
    pub event_type: String,
    /// Opaque structured payload.
    pub payload: serde_json::Value,
    /// Importance in `[0, 1]`.
    pub importance: f64,
    pub tags: BTreeSet<String>,
}

impl Event {
    /// Create a new event stamped now. Importance is clamped into `[0, 1]`.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        importance: f64,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: now_micros(),
            event_type: event_type.into(),
            payload,
            importance: clamp_unit(importance),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Read a string field from the payload.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// Filter for `EventStore::query`.
///
/// A plain value: running the same query twice re-executes it from scratch.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub event_type: Option<String>,
    /// Match events carrying at least one of these tags. Empty matches all.
    pub tags_any: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            tags_any: Vec::new(),
            since: None,
            limit: 100,
        }
    }
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_any_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_any.push(tag.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

// ── Feedback ────────────────────────────────────────────────────────

/// What kind of correction the user supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    ClassificationCorrection,
    ResponseApproval,
    OrganizationPreference,
    PriorityAdjustment,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassificationCorrection => "classification_correction",
            Self::ResponseApproval => "response_approval",
            Self::OrganizationPreference => "organization_preference",
            Self::PriorityAdjustment => "priority_adjustment",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackKind {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classification_correction" => Ok(Self::ClassificationCorrection),
            "response_approval" => Ok(Self::ResponseApproval),
            "organization_preference" => Ok(Self::OrganizationPreference),
            "priority_adjustment" => Ok(Self::PriorityAdjustment),
            other => Err(FeedbackError::UnknownKind(other.to_string())),
        }
    }
}

/// A user correction referencing the event it corrects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    /// May reference an event that was never stored or has been pruned.
    pub source_event_id: Uuid,
    pub kind: FeedbackKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(source_event_id: Uuid, kind: FeedbackKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_event_id,
            kind,
            payload,
            timestamp: now_micros(),
        }
    }
}

// ── Preferences ─────────────────────────────────────────────────────

/// Composite preference key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreferenceKey {
    pub category: String,
    pub key: String,
}

impl PreferenceKey {
    pub fn new(category: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.key)
    }
}

/// A learned, confidence-weighted fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub category: String,
    pub key: String,
    /// Most recent correction wins.
    pub value: serde_json::Value,
    /// Trust signal in `[0, 1]`.
    pub confidence: f64,
    /// Contributing event/feedback IDs, oldest first.
    pub provenance: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl Preference {
    pub fn preference_key(&self) -> PreferenceKey {
        PreferenceKey::new(&self.category, &self.key)
    }
}

/// Current time truncated to the microsecond precision timestamps are stored with.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
