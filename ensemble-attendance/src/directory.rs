//! External collaborator contracts
//!
//! The attendance core consumes three collaborators it does not own:
//! - Roster resolver: event → enrollable students with section/part
//! - Beacon registry: which beacon identifiers exist, and their labels
//! - Event catalog: which events exist, and their scheduled windows
//!
//! `SqliteDirectory` implements all three over the shared database. Event
//! timestamps are normalized to UTC here, never inside the ledger.

use async_trait::async_trait;
use ensemble_common::attendance::{EventId, EventWindow, RosterEntry};
use ensemble_common::time::parse_lenient_utc;
use ensemble_common::Result;
use sqlx::{Row, SqlitePool};

#[async_trait]
pub trait RosterResolver: Send + Sync {
    /// Enrollable students for an event, in roster order
    ///
    /// Unknown events resolve to an empty roster.
    async fn resolve(&self, event_id: EventId) -> Result<Vec<RosterEntry>>;
}

#[async_trait]
pub trait BeaconRegistry: Send + Sync {
    async fn is_known(&self, beacon_identifier: &str) -> Result<bool>;

    /// Display label, `None` for unknown beacons
    async fn label(&self, beacon_identifier: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait EventCatalog: Send + Sync {
    async fn exists(&self, event_id: EventId) -> Result<bool>;

    /// Scheduled window, `None` for unknown events
    async fn window(&self, event_id: EventId) -> Result<Option<EventWindow>>;
}

/// SQLite-backed roster, beacon registry and event catalog
#[derive(Clone)]
pub struct SqliteDirectory {
    db: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RosterResolver for SqliteDirectory {
    async fn resolve(&self, event_id: EventId) -> Result<Vec<RosterEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT s.student_id, s.first_name, s.last_name, m.section, m.part, s.email
            FROM events e
            JOIN ensemble_members m ON m.ensemble_id = e.ensemble_id
            JOIN students s ON s.student_id = m.student_id
            WHERE e.event_id = ?
            ORDER BY m.roster_order, s.last_name, s.first_name, s.student_id
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RosterEntry {
                student_id: row.get("student_id"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                section: row.get("section"),
                part: row.get("part"),
                email: row.get("email"),
            })
            .collect())
    }
}

#[async_trait]
impl BeaconRegistry for SqliteDirectory {
    async fn is_known(&self, beacon_identifier: &str) -> Result<bool> {
        Ok(self.label(beacon_identifier).await?.is_some())
    }

    async fn label(&self, beacon_identifier: &str) -> Result<Option<String>> {
        let label: Option<String> = sqlx::query_scalar(
            "SELECT label FROM beacons WHERE beacon_identifier = ? COLLATE NOCASE",
        )
        .bind(beacon_identifier)
        .fetch_optional(&self.db)
        .await?;

        Ok(label)
    }
}

#[async_trait]
impl EventCatalog for SqliteDirectory {
    async fn exists(&self, event_id: EventId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE event_id = ?)")
            .bind(event_id)
            .fetch_one(&self.db)
            .await?;

        Ok(exists)
    }

    async fn window(&self, event_id: EventId) -> Result<Option<EventWindow>> {
        let row = sqlx::query("SELECT start_time, end_time FROM events WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.db)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let start_time = parse_lenient_utc(&row.get::<String, _>("start_time"))?;
        let end_time = parse_lenient_utc(&row.get::<String, _>("end_time"))?;

        Ok(Some(EventWindow { start_time, end_time }))
    }
}
