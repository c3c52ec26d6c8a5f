//! Event-sourced memory: event log, learned preferences and the learning
//! rules that connect them.

pub mod events;
pub mod learning;
pub mod model;
pub mod preferences;

use std::sync::Arc;

pub use events::EventStore;
pub use learning::{FeedbackOutcome, LearningEngine, LearningSummary, SkipReason};
pub use model::{Event, EventQuery, FeedbackKind, FeedbackRecord, Preference, PreferenceKey};
pub use preferences::PreferenceStore;

use crate::config::MemoryConfig;
use crate::error::DatabaseError;
use crate::store::Database;

/// The three memory components wired to one database.
pub struct Memory {
    pub events: Arc<EventStore>,
    pub preferences: Arc<PreferenceStore>,
    pub learning: Arc<LearningEngine>,
}

impl Memory {
    pub async fn open(db: Arc<dyn Database>, config: &MemoryConfig) -> Result<Self, DatabaseError> {
        let events = Arc::new(EventStore::open(db.clone(), config).await?);
        let preferences = Arc::new(PreferenceStore::open(db.clone()).await?);
        let learning = Arc::new(LearningEngine::new(db, events.clone(), preferences.clone()));
        Ok(Self {
            events,
            preferences,
            learning,
        })
    }
}
