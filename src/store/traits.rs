//! Unified `Database` trait, a single async interface for all persistence.
//!
//! Three logical tables back the learning layer: events, preferences
//! (composite key `(category, key)`) and feedback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::memory::model::{Event, EventQuery, FeedbackKind, FeedbackRecord, Preference};

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Events ──────────────────────────────────────────────────────

    /// Append an event. Fails on duplicate IDs.
    async fn insert_event(&self, event: &Event) -> Result<(), DatabaseError>;

    /// Get an event by ID.
    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, DatabaseError>;

    /// Events matching the query, newest first.
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>, DatabaseError>;

    // ── Preferences ─────────────────────────────────────────────────

    /// Insert or replace the preference row for its `(category, key)`.
    async fn upsert_preference(&self, preference: &Preference) -> Result<(), DatabaseError>;

    /// Get a single preference.
    async fn get_preference(
        &self,
        category: &str,
        key: &str,
    ) -> Result<Option<Preference>, DatabaseError>;

    /// All stored preferences.
    async fn list_preferences(&self) -> Result<Vec<Preference>, DatabaseError>;

    // ── Feedback ────────────────────────────────────────────────────

    /// Persist a feedback record.
    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), DatabaseError>;

    /// Feedback of one kind, newest first.
    async fn list_feedback(
        &self,
        kind: FeedbackKind,
        limit: usize,
    ) -> Result<Vec<FeedbackRecord>, DatabaseError>;

    /// Number of feedback records received at or after `since`.
    async fn count_feedback_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
