//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 strings (microseconds, `Z` suffix) so that
//! lexicographic order in SQL matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::memory::model::{Event, EventQuery, FeedbackKind, FeedbackRecord, Preference};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for every timestamp column.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid {s}: {e}")))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Raw event columns, decoded outside the libsql error domain.
struct EventRow {
    id: String,
    timestamp: String,
    event_type: String,
    payload: String,
    importance: f64,
    tags: String,
}

/// Column order matches EVENT_COLUMNS.
fn read_event_row(row: &libsql::Row) -> Result<EventRow, libsql::Error> {
    Ok(EventRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        event_type: row.get(2)?,
        payload: row.get(3)?,
        importance: row.get(4)?,
        tags: row.get(5)?,
    })
}

impl EventRow {
    fn into_event(self) -> Result<Event, DatabaseError> {
        Ok(Event {
            id: parse_uuid(&self.id)?,
            timestamp: parse_datetime(&self.timestamp),
            event_type: self.event_type,
            payload: serde_json::from_str(&self.payload)?,
            importance: self.importance,
            tags: serde_json::from_str(&self.tags)?,
        })
    }
}

/// Column order matches PREFERENCE_COLUMNS.
fn row_to_preference(row: &libsql::Row) -> Result<Preference, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("preference row parse: {e}"));
    let value: String = row.get(2).map_err(read)?;
    let provenance: String = row.get(4).map_err(read)?;
    let last_updated: String = row.get(5).map_err(read)?;
    Ok(Preference {
        category: row.get(0).map_err(read)?,
        key: row.get(1).map_err(read)?,
        value: serde_json::from_str(&value)?,
        confidence: row.get(3).map_err(read)?,
        provenance: serde_json::from_str(&provenance)?,
        last_updated: parse_datetime(&last_updated),
    })
}

/// Column order matches FEEDBACK_COLUMNS.
fn row_to_feedback(row: &libsql::Row) -> Result<FeedbackRecord, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("feedback row parse: {e}"));
    let id: String = row.get(0).map_err(read)?;
    let source: String = row.get(1).map_err(read)?;
    let kind: String = row.get(2).map_err(read)?;
    let payload: String = row.get(3).map_err(read)?;
    let timestamp: String = row.get(4).map_err(read)?;
    Ok(FeedbackRecord {
        id: parse_uuid(&id)?,
        source_event_id: parse_uuid(&source)?,
        kind: kind
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("{e}")))?,
        payload: serde_json::from_str(&payload)?,
        timestamp: parse_datetime(&timestamp),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const EVENT_COLUMNS: &str = "id, timestamp, event_type, payload, importance, tags";

const PREFERENCE_COLUMNS: &str = "category, key, value, confidence, provenance, last_updated";

const FEEDBACK_COLUMNS: &str = "id, source_event_id, kind, payload, timestamp";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Events ──────────────────────────────────────────────────────

    async fn insert_event(&self, event: &Event) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&event.payload)?;
        let tags = serde_json::to_string(&event.tags)?;

        self.conn()
            .execute(
                &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    event.id.to_string(),
                    format_datetime(&event.timestamp),
                    event.event_type.clone(),
                    payload,
                    event.importance,
                    tags,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_event: {e}")))?;

        debug!(event_id = %event.id, event_type = %event.event_type, "Event stored");
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_event: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw = read_event_row(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_event row parse: {e}")))?;
                Ok(Some(raw.into_event()?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_event: {e}"))),
        }
    }

    async fn query_events(&self, query: &EventQuery) -> Result<Vec<Event>, DatabaseError> {
        let tags = if query.tags_any.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&query.tags_any)?)
        };
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE (?1 IS NULL OR event_type = ?1)
                       AND (?2 IS NULL OR timestamp >= ?2)
                       AND (?3 IS NULL OR EXISTS (
                             SELECT 1 FROM json_each(events.tags) t
                             WHERE t.value IN (SELECT value FROM json_each(?3))))
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?4"
                ),
                params![
                    opt_text(query.event_type.clone()),
                    opt_text(query.since.as_ref().map(format_datetime)),
                    opt_text(tags),
                    limit,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("query_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let raw = read_event_row(&row)
                .map_err(|e| DatabaseError::Query(format!("query_events row parse: {e}")))?;
            events.push(raw.into_event()?);
        }
        Ok(events)
    }

    // ── Preferences ─────────────────────────────────────────────────

    async fn upsert_preference(&self, preference: &Preference) -> Result<(), DatabaseError> {
        let value = serde_json::to_string(&preference.value)?;
        let provenance = serde_json::to_string(&preference.provenance)?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO preferences ({PREFERENCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(category, key) DO UPDATE SET
                        value = excluded.value,
                        confidence = excluded.confidence,
                        provenance = excluded.provenance,
                        last_updated = excluded.last_updated"
                ),
                params![
                    preference.category.clone(),
                    preference.key.clone(),
                    value,
                    preference.confidence,
                    provenance,
                    format_datetime(&preference.last_updated),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_preference: {e}")))?;
        Ok(())
    }

    async fn get_preference(
        &self,
        category: &str,
        key: &str,
    ) -> Result<Option<Preference>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PREFERENCE_COLUMNS} FROM preferences WHERE category = ?1 AND key = ?2"
                ),
                params![category, key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_preference: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_preference(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_preference: {e}"))),
        }
    }

    async fn list_preferences(&self) -> Result<Vec<Preference>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PREFERENCE_COLUMNS} FROM preferences ORDER BY category, key"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_preferences: {e}")))?;

        let mut prefs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            prefs.push(row_to_preference(&row)?);
        }
        Ok(prefs)
    }

    // ── Feedback ────────────────────────────────────────────────────

    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(&feedback.payload)?;

        self.conn()
            .execute(
                &format!("INSERT INTO feedback ({FEEDBACK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    feedback.id.to_string(),
                    feedback.source_event_id.to_string(),
                    feedback.kind.as_str(),
                    payload,
                    format_datetime(&feedback.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_feedback: {e}")))?;

        debug!(feedback_id = %feedback.id, kind = %feedback.kind, "Feedback stored");
        Ok(())
    }

    async fn list_feedback(
        &self,
        kind: FeedbackKind,
        limit: usize,
    ) -> Result<Vec<FeedbackRecord>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE kind = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT ?2"
                ),
                params![kind.as_str(), limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_feedback: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_feedback(&row)?);
        }
        Ok(records)
    }

    async fn count_feedback_since(&self, since: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM feedback WHERE timestamp >= ?1",
                params![format_datetime(&since)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_feedback_since: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_feedback_since: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_feedback_since: {e}"))),
        }
    }
}
