//! Turns user feedback into preference updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::FeedbackError;
use crate::memory::events::EventStore;
use crate::memory::model::{Event, FeedbackKind, FeedbackRecord, PreferenceKey};
use crate::memory::preferences::PreferenceStore;
use crate::store::Database;

const SENDER_CATEGORY_BOOST: f64 = 0.3;
const KEYWORD_CATEGORY_BOOST: f64 = 0.2;
const RESPONSE_APPROVED_BOOST: f64 = 0.4;
const RESPONSE_REJECTED_PENALTY: f64 = -0.2;
const ORGANIZATION_BOOST: f64 = 0.3;
const PRIORITY_BOOST: f64 = 0.4;
/// Priority corrections at or below this distance are ignored.
const PRIORITY_MIN_DIFFERENCE: f64 = 1.0;
/// Preferences above this confidence count as "high confidence".
const HIGH_CONFIDENCE: f64 = 0.7;

/// What `record_feedback` did with a correction.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    /// These preferences were merged (in update order).
    Applied(Vec<PreferenceKey>),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The referenced event was never stored or is unknown.
    SourceMissing,
    /// The source event lacks the fields the rule keys on.
    SourceIncomplete,
    /// The priority correction is too small to learn from.
    BelowThreshold,
}

/// Validated correction extracted from a feedback payload.
#[derive(Debug, Clone, PartialEq)]
enum Correction {
    Category(String),
    Approval(bool),
    Action(String),
    Priority(f64),
}

impl Correction {
    fn parse(kind: FeedbackKind, payload: &Value) -> Result<Self, FeedbackError> {
        let invalid = |reason: &str| FeedbackError::InvalidPayload {
            kind: kind.to_string(),
            reason: reason.to_string(),
        };
        match kind {
            FeedbackKind::ClassificationCorrection => payload
                .get("correct_category")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| Self::Category(s.to_string()))
                .ok_or_else(|| invalid("missing string field correct_category")),
            FeedbackKind::ResponseApproval => payload
                .get("approved")
                .and_then(Value::as_bool)
                .map(Self::Approval)
                .ok_or_else(|| invalid("missing boolean field approved")),
            FeedbackKind::OrganizationPreference => payload
                .get("action")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| Self::Action(s.to_string()))
                .ok_or_else(|| invalid("missing string field action")),
            FeedbackKind::PriorityAdjustment => payload
                .get("correct_priority")
                .and_then(Value::as_f64)
                .map(Self::Priority)
                .ok_or_else(|| invalid("missing numeric field correct_priority")),
        }
    }
}

/// A single planned preference merge.
struct Update {
    category: &'static str,
    key: String,
    value: Value,
    delta: f64,
}

/// Derive the preference updates a correction implies for its source event.
fn derive_updates(source: &Event, correction: &Correction) -> Result<Vec<Update>, SkipReason> {
    let sender = source.str_field("sender").filter(|s| !s.is_empty());

    match correction {
        Correction::Category(category) => {
            let sender = sender.ok_or(SkipReason::SourceIncomplete)?;
            let mut updates = vec![Update {
                category: "classification",
                key: format!("sender_category_{sender}"),
                value: json!(category),
                delta: SENDER_CATEGORY_BOOST,
            }];
            let keywords = source
                .payload
                .get("keywords")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str);
            for keyword in keywords {
                updates.push(Update {
                    category: "classification",
                    key: format!("keyword_category_{keyword}"),
                    value: json!(category),
                    delta: KEYWORD_CATEGORY_BOOST,
                });
            }
            Ok(updates)
        }
        Correction::Approval(approved) => {
            let intent = source.str_field("intent").filter(|s| !s.is_empty());
            let style = source.str_field("response_style").filter(|s| !s.is_empty());
            let (Some(intent), Some(style)) = (intent, style) else {
                return Err(SkipReason::SourceIncomplete);
            };
            Ok(vec![Update {
                category: "response",
                key: format!("intent_style_{intent}"),
                value: json!({"style": style, "approved": approved}),
                delta: if *approved {
                    RESPONSE_APPROVED_BOOST
                } else {
                    RESPONSE_REJECTED_PENALTY
                },
            }])
        }
        Correction::Action(action) => {
            let sender = sender.ok_or(SkipReason::SourceIncomplete)?;
            Ok(vec![Update {
                category: "organization",
                key: format!("sender_action_{sender}"),
                value: json!(action),
                delta: ORGANIZATION_BOOST,
            }])
        }
        Correction::Priority(adjusted) => {
            let sender = sender.ok_or(SkipReason::SourceIncomplete)?;
            let original = source
                .payload
                .get("priority")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            if (original - adjusted).abs() <= PRIORITY_MIN_DIFFERENCE {
                return Err(SkipReason::BelowThreshold);
            }
            Ok(vec![Update {
                category: "priority",
                key: format!("sender_priority_{sender}"),
                value: json!(adjusted),
                delta: PRIORITY_BOOST,
            }])
        }
    }
}

/// Aggregate view of what has been learned so far.
#[derive(Debug, Clone, Serialize)]
pub struct LearningSummary {
    pub cached_events: usize,
    pub total_preferences: usize,
    pub preferences_by_category: BTreeMap<String, usize>,
    pub average_confidence: f64,
    /// Share of preferences above 0.7 confidence, in percent.
    pub high_confidence_percentage: f64,
    /// Feedback received in the last seven days.
    pub recent_feedback_count: u64,
    /// Approved share of recent response approvals; `None` without any.
    pub response_approval_rate: Option<f64>,
}

/// Applies per-kind learning rules to incoming feedback.
pub struct LearningEngine {
    db: Arc<dyn Database>,
    events: Arc<EventStore>,
    preferences: Arc<PreferenceStore>,
}

impl LearningEngine {
    pub fn new(
        db: Arc<dyn Database>,
        events: Arc<EventStore>,
        preferences: Arc<PreferenceStore>,
    ) -> Self {
        Self {
            db,
            events,
            preferences,
        }
    }

    /// Same as [`record_feedback`](Self::record_feedback) with the kind
    /// given by name.
    pub async fn record_feedback_named(
        &self,
        source_event_id: Uuid,
        kind: &str,
        payload: Value,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let kind: FeedbackKind = kind.parse().inspect_err(|e| warn!(error = %e, "Dropping feedback"))?;
        self.record_feedback(source_event_id, kind, payload).await
    }

    /// Persist a correction and learn from it.
    ///
    /// Malformed payloads are rejected before anything is stored. Storage
    /// failures are logged and do not stop learning.
    pub async fn record_feedback(
        &self,
        source_event_id: Uuid,
        kind: FeedbackKind,
        payload: Value,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let correction = Correction::parse(kind, &payload)
            .inspect_err(|e| warn!(source_event = %source_event_id, error = %e, "Dropping feedback"))?;

        let record = FeedbackRecord::new(source_event_id, kind, payload);
        if let Err(e) = self.db.insert_feedback(&record).await {
            warn!(feedback_id = %record.id, error = %e, "Failed to persist feedback");
        }

        let source = match self.events.get(source_event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Kept as a drop: corrections against unknown events are lost.
                warn!(source_event = %source_event_id, kind = %kind, "Feedback source event not found");
                return Ok(FeedbackOutcome::Skipped(SkipReason::SourceMissing));
            }
            Err(e) => {
                warn!(source_event = %source_event_id, error = %e, "Failed to load feedback source event");
                return Ok(FeedbackOutcome::Skipped(SkipReason::SourceMissing));
            }
        };

        let updates = match derive_updates(&source, &correction) {
            Ok(updates) => updates,
            Err(reason) => {
                info!(source_event = %source_event_id, kind = %kind, ?reason, "Feedback not applicable");
                return Ok(FeedbackOutcome::Skipped(reason));
            }
        };

        let contributing_id = source.id.to_string();
        let mut applied = Vec::with_capacity(updates.len());
        for update in updates {
            if let Err(e) = self
                .preferences
                .merge_preference(
                    update.category,
                    &update.key,
                    update.value,
                    &contributing_id,
                    update.delta,
                )
                .await
            {
                warn!(key = %update.key, error = %e, "Preference kept in memory only");
            }
            applied.push(PreferenceKey::new(update.category, update.key));
        }

        info!(kind = %kind, updated = applied.len(), "Learned from feedback");
        Ok(FeedbackOutcome::Applied(applied))
    }

    /// Approved share of the most recent response approvals.
    pub async fn response_approval_rate(&self) -> Option<f64> {
        let records = match self.db.list_feedback(FeedbackKind::ResponseApproval, 1000).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to load response approvals");
                return None;
            }
        };
        if records.is_empty() {
            return None;
        }
        let approved = records
            .iter()
            .filter(|r| r.payload.get("approved").and_then(Value::as_bool) == Some(true))
            .count();
        Some(approved as f64 / records.len() as f64)
    }

    pub async fn summary(&self) -> LearningSummary {
        let prefs = self.preferences.all();
        let mut preferences_by_category = BTreeMap::new();
        for pref in &prefs {
            *preferences_by_category.entry(pref.category.clone()).or_insert(0) += 1;
        }

        let (average_confidence, high_confidence_percentage) = if prefs.is_empty() {
            (0.0, 0.0)
        } else {
            let n = prefs.len() as f64;
            let sum: f64 = prefs.iter().map(|p| p.confidence).sum();
            let high = prefs.iter().filter(|p| p.confidence > HIGH_CONFIDENCE).count() as f64;
            (sum / n, high / n * 100.0)
        };

        let week_ago = chrono::Utc::now() - chrono::Duration::days(7);
        let recent_feedback_count = self
            .db
            .count_feedback_since(week_ago)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count recent feedback");
                0
            });

        LearningSummary {
            cached_events: self.events.recent_len(),
            total_preferences: prefs.len(),
            preferences_by_category,
            average_confidence,
            high_confidence_percentage,
            recent_feedback_count,
            response_approval_rate: self.response_approval_rate().await,
        }
    }
}
