//! Append-only event log with a bounded recent cache.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::DatabaseError;
use crate::memory::model::{Event, EventQuery};
use crate::store::Database;

/// Durable event log fronted by an in-memory cache of recent events.
///
/// The cache holds at most `recent_cache_capacity` events no older than
/// `recent_window`, oldest first. Pruned events stay readable from the
/// durable store.
pub struct EventStore {
    db: Arc<dyn Database>,
    recent: RwLock<VecDeque<Event>>,
    capacity: usize,
    window: chrono::Duration,
}

impl EventStore {
    /// Open the store and warm the cache from the durable log.
    pub async fn open(db: Arc<dyn Database>, config: &MemoryConfig) -> Result<Self, DatabaseError> {
        let since = chrono::Utc::now() - config.recent_window;
        let mut warm = db
            .query_events(&EventQuery::new().since(since).limit(config.recent_cache_capacity))
            .await?;
        warm.reverse();
        debug!(cached = warm.len(), "Event cache warmed");

        Ok(Self {
            db,
            recent: RwLock::new(warm.into()),
            capacity: config.recent_cache_capacity,
            window: config.recent_window,
        })
    }

    /// Append a new event. Importance is clamped into `[0, 1]`.
    ///
    /// The event only enters the cache once the durable write succeeded.
    pub async fn append(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        importance: f64,
        tags: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Uuid, DatabaseError> {
        let event = Event::new(event_type, payload, importance, tags);
        self.append_event(event).await
    }

    /// Append a pre-built event. Its timestamp may predate cached events;
    /// the cache stays ordered by timestamp.
    pub async fn append_event(&self, event: Event) -> Result<Uuid, DatabaseError> {
        if let Err(e) = self.db.insert_event(&event).await {
            warn!(event_type = %event.event_type, error = %e, "Failed to persist event");
            return Err(e);
        }

        let id = event.id;
        let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
        let at = recent
            .iter()
            .rposition(|cached| cached.timestamp <= event.timestamp)
            .map_or(0, |i| i + 1);
        recent.insert(at, event);
        self.prune_locked(&mut recent);
        Ok(id)
    }

    /// Look up an event, cache first.
    pub async fn get(&self, id: Uuid) -> Result<Option<Event>, DatabaseError> {
        let cached = {
            let recent = self.recent.read().unwrap_or_else(|e| e.into_inner());
            recent.iter().rev().find(|e| e.id == id).cloned()
        };
        match cached {
            Some(event) => Ok(Some(event)),
            None => self.db.get_event(id).await,
        }
    }

    /// Events matching `query`, newest first.
    pub async fn query(&self, query: &EventQuery) -> Result<Vec<Event>, DatabaseError> {
        self.db.query_events(query).await
    }

    /// Number of events currently cached.
    pub fn recent_len(&self) -> usize {
        self.recent.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop cached events that fell outside the recent window.
    pub fn prune_cache(&self) -> usize {
        let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
        self.prune_locked(&mut recent)
    }

    fn prune_locked(&self, recent: &mut VecDeque<Event>) -> usize {
        let before = recent.len();
        let cutoff = chrono::Utc::now() - self.window;
        while recent.front().is_some_and(|e| e.timestamp < cutoff) {
            recent.pop_front();
        }
        while recent.len() > self.capacity {
            recent.pop_front();
        }
        before - recent.len()
    }
}
