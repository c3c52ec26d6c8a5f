//! Confidence-weighted preference store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::memory::model::{Preference, PreferenceKey, clamp_unit, now_micros};
use crate::store::Database;

/// Confidence assigned to a key before its first delta is applied.
const BASE_CONFIDENCE: f64 = 0.5;

/// Keyed preferences, cached in memory and persisted on every merge.
pub struct PreferenceStore {
    db: Arc<dyn Database>,
    cache: RwLock<HashMap<PreferenceKey, Preference>>,
    /// One async lock per key; merges on the same key run one at a time.
    key_locks: Mutex<HashMap<PreferenceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl PreferenceStore {
    /// Load every stored preference into memory.
    pub async fn open(db: Arc<dyn Database>) -> Result<Self, DatabaseError> {
        let loaded = db.list_preferences().await?;
        debug!(count = loaded.len(), "Preferences loaded");
        let cache = loaded
            .into_iter()
            .map(|p| (p.preference_key(), p))
            .collect();
        Ok(Self {
            db,
            cache: RwLock::new(cache),
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    fn key_lock(&self, key: &PreferenceKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    /// Merge a new observation into `(category, key)`.
    ///
    /// The value is overwritten and `contributing_id` appended to the
    /// provenance. Confidence becomes `clamp(old + delta)`, or
    /// `clamp(0.5 + delta)` for a new key.
    ///
    /// This is repeated clamped addition, not an average: two
    /// +0.3 boosts on a fresh key give 0.8 then 1.0. Do not replace it with a
    /// running mean.
    ///
    /// The in-memory value is updated even when persisting fails; the
    /// storage error is still returned.
    pub async fn merge_preference(
        &self,
        category: &str,
        key: &str,
        new_value: serde_json::Value,
        contributing_id: &str,
        delta: f64,
    ) -> Result<Preference, DatabaseError> {
        let pref_key = PreferenceKey::new(category, key);
        let lock = self.key_lock(&pref_key);
        let _guard = lock.lock().await;

        let existing = {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            cache.get(&pref_key).cloned()
        };

        let merged = match existing {
            Some(mut pref) => {
                pref.value = new_value;
                pref.provenance.push(contributing_id.to_string());
                pref.confidence = clamp_unit(pref.confidence + delta);
                pref.last_updated = now_micros();
                pref
            }
            None => Preference {
                category: category.to_string(),
                key: key.to_string(),
                value: new_value,
                confidence: clamp_unit(BASE_CONFIDENCE + delta),
                provenance: vec![contributing_id.to_string()],
                last_updated: now_micros(),
            },
        };

        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(pref_key.clone(), merged.clone());
        }

        if let Err(e) = self.db.upsert_preference(&merged).await {
            warn!(preference = %pref_key, error = %e, "Failed to persist preference");
            return Err(e);
        }

        debug!(
            preference = %pref_key,
            confidence = merged.confidence,
            "Preference updated"
        );
        Ok(merged)
    }

    /// Current value and confidence, or `(default, 0.0)` when unknown.
    pub fn get_preference(
        &self,
        category: &str,
        key: &str,
        default: serde_json::Value,
    ) -> (serde_json::Value, f64) {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        match cache.get(&PreferenceKey::new(category, key)) {
            Some(pref) => (pref.value.clone(), pref.confidence),
            None => (default, 0.0),
        }
    }

    pub fn get_f64(&self, category: &str, key: &str) -> Option<f64> {
        self.get(category, key).and_then(|p| p.value.as_f64())
    }

    pub fn get_bool(&self, category: &str, key: &str) -> Option<bool> {
        self.get(category, key).and_then(|p| p.value.as_bool())
    }

    pub fn get(&self, category: &str, key: &str) -> Option<Preference> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(&PreferenceKey::new(category, key)).cloned()
    }

    /// All preferences ordered by key.
    pub fn all(&self) -> Vec<Preference> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let mut prefs: Vec<Preference> = cache.values().cloned().collect();
        prefs.sort_by(|a, b| (&a.category, &a.key).cmp(&(&b.category, &b.key)));
        prefs
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
