//! Merging branch results into a confidence-gated execution plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::memory::PreferenceStore;
use crate::memory::model::clamp_unit;
use crate::pipeline::fanout::FanOut;
use crate::pipeline::types::{Action, PlannedAction};

/// Preference category holding workflow overrides.
pub const WORKFLOW_CATEGORY: &str = "workflow";

/// Effective gating thresholds for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub classification: f64,
    pub response: f64,
    pub auto_organize: bool,
}

impl GateThresholds {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            classification: config.classification_threshold,
            response: config.response_threshold,
            auto_organize: config.auto_organize,
        }
    }

    /// Configuration values, overridden by `workflow.*` preferences when
    /// present and valid.
    pub fn resolve(config: &OrchestratorConfig, preferences: &PreferenceStore) -> Self {
        let mut thresholds = Self::from_config(config);

        let unit_override = |key: &str| match preferences.get_f64(WORKFLOW_CATEGORY, key) {
            Some(v) if (0.0..=1.0).contains(&v) => Some(v),
            Some(v) => {
                warn!(key, value = v, "Ignoring out-of-range threshold preference");
                None
            }
            None => None,
        };

        if let Some(v) = unit_override("classification_threshold") {
            thresholds.classification = v;
        }
        if let Some(v) = unit_override("response_threshold") {
            thresholds.response = v;
        }
        if let Some(v) = preferences.get_bool(WORKFLOW_CATEGORY, "auto_organize") {
            thresholds.auto_organize = v;
        }
        thresholds
    }

    /// Whether the action may run without approval.
    pub fn is_immediate(&self, action: &PlannedAction) -> bool {
        match action.action {
            Action::Classify { .. } => action.confidence >= self.classification,
            Action::Respond { .. } => action.confidence >= self.response,
            Action::Organize { .. } => self.auto_organize,
        }
    }
}

/// Planned actions sorted into buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub immediate: Vec<PlannedAction>,
    pub needs_approval: Vec<PlannedAction>,
    /// Reserved; nothing schedules actions yet.
    pub scheduled: Vec<PlannedAction>,
    /// Immediate actions that executed successfully.
    pub completed: Vec<PlannedAction>,
}

impl ExecutionPlan {
    /// Merge branch results and gate each action.
    pub fn build(fan_out: &FanOut, thresholds: &GateThresholds) -> Self {
        let mut plan = Self::default();
        for action in merge(fan_out).into_values() {
            if thresholds.is_immediate(&action) {
                plan.immediate.push(action);
            } else {
                plan.needs_approval.push(action);
            }
        }
        debug!(
            immediate = plan.immediate.len(),
            needs_approval = plan.needs_approval.len(),
            "Execution plan built"
        );
        plan
    }

    pub fn len(&self) -> usize {
        self.immediate.len() + self.needs_approval.len() + self.scheduled.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Union of all branch results keyed by `(record id, action key)`.
///
/// Iteration order is the key order, so the result does not depend on
/// which branch finished first. Duplicate keys keep the higher confidence.
pub fn merge(fan_out: &FanOut) -> BTreeMap<(String, String), PlannedAction> {
    let candidates = fan_out
        .classifications
        .iter()
        .filter_map(|c| c.planned_action())
        .chain(fan_out.organizations.iter().map(PlannedAction::from))
        .chain(fan_out.responses.iter().map(PlannedAction::from));

    let mut merged: BTreeMap<(String, String), PlannedAction> = BTreeMap::new();
    for mut action in candidates {
        action.confidence = clamp_unit(action.confidence);
        let key = action.merge_key();
        match merged.get(&key) {
            Some(existing) if existing.confidence >= action.confidence => {}
            _ => {
                merged.insert(key, action);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fanout::tests::classification;
    use crate::pipeline::types::{OrganizationResult, OrganizeAction, ResponseCandidate};
    use crate::store::{Database, LibSqlBackend};
    use serde_json::json;
    use std::sync::Arc;

    fn defaults() -> GateThresholds {
        GateThresholds::from_config(&OrchestratorConfig::default())
    }

    fn organize(record_id: &str, confidence: f64) -> OrganizationResult {
        OrganizationResult {
            record_id: record_id.into(),
            suggested_action: OrganizeAction::Archive,
            target: None,
            confidence,
        }
    }

    fn respond(record_id: &str, confidence: f64) -> ResponseCandidate {
        ResponseCandidate {
            record_id: record_id.into(),
            response_text: "Thanks, will do.".into(),
            intent: "request".into(),
            style: Some("formal".into()),
            confidence,
        }
    }

    #[test]
    fn classification_gates_at_threshold() {
        let fan_out = FanOut {
            classifications: vec![
                classification("r1", "work", 0.75),
                classification("r2", "work", 0.65),
                classification("r3", "work", 0.7),
            ],
            ..FanOut::default()
        };
        let plan = ExecutionPlan::build(&fan_out, &defaults());
        let immediate: Vec<&str> = plan.immediate.iter().map(|a| a.record_id.as_str()).collect();
        let approval: Vec<&str> = plan.needs_approval.iter().map(|a| a.record_id.as_str()).collect();
        assert_eq!(immediate, vec!["r1", "r3"]);
        assert_eq!(approval, vec!["r2"]);
    }

    #[test]
    fn responses_use_their_own_threshold() {
        let fan_out = FanOut {
            responses: vec![respond("r1", 0.79), respond("r2", 0.8)],
            ..FanOut::default()
        };
        let plan = ExecutionPlan::build(&fan_out, &defaults());
        assert_eq!(plan.immediate.len(), 1);
        assert_eq!(plan.immediate[0].record_id, "r2");
    }

    #[test]
    fn organization_follows_auto_organize_flag() {
        let fan_out = FanOut {
            organizations: vec![organize("r1", 0.1)],
            ..FanOut::default()
        };
        let plan = ExecutionPlan::build(&fan_out, &defaults());
        assert_eq!(plan.immediate.len(), 1);

        let manual = GateThresholds {
            auto_organize: false,
            ..defaults()
        };
        let plan = ExecutionPlan::build(&fan_out, &manual);
        assert_eq!(plan.needs_approval.len(), 1);
    }

    #[test]
    fn merge_is_order_independent_and_keeps_best() {
        let a = FanOut {
            classifications: vec![
                classification("r2", "news", 0.5),
                classification("r1", "work", 0.6),
                classification("r1", "personal", 0.9),
            ],
            responses: vec![respond("r1", 0.85)],
            ..FanOut::default()
        };
        let mut b = a.clone();
        b.classifications.reverse();

        let merged_a: Vec<PlannedAction> = merge(&a).into_values().collect();
        let merged_b: Vec<PlannedAction> = merge(&b).into_values().collect();
        assert_eq!(merged_a, merged_b);
        assert_eq!(merged_a.len(), 3);
        assert_eq!(
            merged_a[0].action,
            Action::Classify {
                category: "personal".into(),
                priority_score: Some(3.0)
            }
        );
    }

    #[tokio::test]
    async fn preference_overrides_thresholds() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let prefs = PreferenceStore::open(db).await.unwrap();
        prefs
            .merge_preference(WORKFLOW_CATEGORY, "classification_threshold", json!(0.6), "manual", 0.0)
            .await
            .unwrap();
        prefs
            .merge_preference(WORKFLOW_CATEGORY, "response_threshold", json!(1.4), "manual", 0.0)
            .await
            .unwrap();
        prefs
            .merge_preference(WORKFLOW_CATEGORY, "auto_organize", json!(false), "manual", 0.0)
            .await
            .unwrap();

        let resolved = GateThresholds::resolve(&OrchestratorConfig::default(), &prefs);
        assert_eq!(resolved.classification, 0.6);
        assert_eq!(resolved.response, 0.8);
        assert!(!resolved.auto_organize);
    }
}
