//! Beacon session manager
//!
//! Owns the lifecycle of automatic-attendance sessions. At most one session
//! is active per event: `start` on an event with an active session
//! supersedes it inside one transaction, and a partial unique index on
//! `auto_attendance_sessions` rejects anything that slips past.
//!
//! Stopped and superseded sessions are kept as history.

use std::sync::Arc;

use ensemble_common::attendance::{AutoAttendanceSession, EventId, EventWindow, SessionStatus};
use ensemble_common::db::{retry_on_lock, settings};
use ensemble_common::time::{now, parse_rfc3339, to_storage};
use ensemble_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::{BeaconRegistry, EventCatalog};

const SESSION_COLUMNS: &str = "session_id, event_id, beacon_identifier, started_at, stopped_at, is_active";

pub struct BeaconSessionManager {
    db: SqlitePool,
    beacons: Arc<dyn BeaconRegistry>,
    catalog: Arc<dyn EventCatalog>,
}

impl BeaconSessionManager {
    pub fn new(db: SqlitePool, beacons: Arc<dyn BeaconRegistry>, catalog: Arc<dyn EventCatalog>) -> Self {
        Self { db, beacons, catalog }
    }

    /// Start a session, superseding any active one for the event
    pub async fn start(&self, event_id: EventId, beacon_identifier: &str) -> Result<AutoAttendanceSession> {
        let beacon_identifier = beacon_identifier.trim();
        if beacon_identifier.is_empty() {
            return Err(Error::Validation("beacon_identifier is required".to_string()));
        }
        if !self.beacons.is_known(beacon_identifier).await? {
            return Err(Error::Validation(format!("unknown beacon '{}'", beacon_identifier)));
        }
        if !self.catalog.exists(event_id).await? {
            return Err(Error::NotFound(format!("event {}", event_id)));
        }

        let max_wait_ms = settings::max_lock_wait_ms(&self.db).await?;
        let (session, superseded) = retry_on_lock("session_start", max_wait_ms, || async move {
            let started_at = now();
            let stamp = to_storage(&started_at);
            let mut tx = self.db.begin().await?;

            // Deactivate first so the write lock is held before the insert
            let superseded: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE auto_attendance_sessions
                SET is_active = 0, stopped_at = ?
                WHERE event_id = ? AND is_active = 1
                RETURNING session_id
                "#,
            )
            .bind(&stamp)
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await?;

            let session = AutoAttendanceSession {
                session_id: Uuid::new_v4(),
                event_id,
                beacon_identifier: beacon_identifier.to_string(),
                started_at,
                stopped_at: None,
                is_active: true,
            };

            sqlx::query(
                r#"
                INSERT INTO auto_attendance_sessions
                    (session_id, event_id, beacon_identifier, started_at, stopped_at, is_active)
                VALUES (?, ?, ?, ?, NULL, 1)
                "#,
            )
            .bind(session.session_id.to_string())
            .bind(event_id)
            .bind(&session.beacon_identifier)
            .bind(&stamp)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok((session, superseded))
        })
        .await?;

        match superseded {
            Some(previous) => info!(
                event_id,
                session_id = %session.session_id,
                superseded = %previous,
                beacon = %session.beacon_identifier,
                "Auto-attendance session superseded"
            ),
            None => info!(
                event_id,
                session_id = %session.session_id,
                beacon = %session.beacon_identifier,
                "Auto-attendance session started"
            ),
        }

        // Committed by now; window errors only skip this check
        if let Some(window) = self.window_or_none(event_id).await {
            if session.started_at > window.end_time {
                warn!(
                    event_id,
                    end_time = %window.end_time,
                    "Session started after the event's scheduled end"
                );
            }
        }

        Ok(session)
    }

    /// Stop the active session, if any
    ///
    /// Returns the stopped session; stopping with nothing active is a no-op.
    pub async fn stop(&self, event_id: EventId) -> Result<Option<AutoAttendanceSession>> {
        let max_wait_ms = settings::max_lock_wait_ms(&self.db).await?;
        let row = retry_on_lock("session_stop", max_wait_ms, || async move {
            let stamp = to_storage(&now());
            let row = sqlx::query(&format!(
                r#"
                UPDATE auto_attendance_sessions
                SET is_active = 0, stopped_at = ?
                WHERE event_id = ? AND is_active = 1
                RETURNING {}
                "#,
                SESSION_COLUMNS
            ))
            .bind(stamp)
            .bind(event_id)
            .fetch_optional(&self.db)
            .await?;
            Ok(row)
        })
        .await?;

        let stopped = row.as_ref().map(session_from_row).transpose()?;
        match &stopped {
            Some(session) => info!(event_id, session_id = %session.session_id, "Auto-attendance session stopped"),
            None => debug!(event_id, "Stop requested with no active session"),
        }

        Ok(stopped)
    }

    /// Event window for display, or `None` when it cannot be read
    async fn window_or_none(&self, event_id: EventId) -> Option<EventWindow> {
        match self.catalog.window(event_id).await {
            Ok(window) => window,
            Err(e) => {
                warn!(event_id, "Event window unavailable: {}", e);
                None
            }
        }
    }

    /// Active session and display context
    pub async fn status(&self, event_id: EventId) -> Result<SessionStatus> {
        let session = self.active_session(event_id).await?;
        let window = self.window_or_none(event_id).await;

        let beacon_label = match &session {
            Some(s) => self.beacons.label(&s.beacon_identifier).await?,
            None => None,
        };

        let past_window = match (&session, window) {
            (Some(_), Some(window)) => {
                let grace = settings::session_window_grace(&self.db).await?;
                now() > window.end_time + grace
            }
            _ => false,
        };

        Ok(SessionStatus {
            event_id,
            is_active: session.is_some(),
            session,
            beacon_label,
            window,
            past_window,
        })
    }

    pub async fn active_session(&self, event_id: EventId) -> Result<Option<AutoAttendanceSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM auto_attendance_sessions WHERE event_id = ? AND is_active = 1",
            SESSION_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Every session for the event, newest first
    pub async fn history(&self, event_id: EventId) -> Result<Vec<AutoAttendanceSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM auto_attendance_sessions WHERE event_id = ? ORDER BY started_at DESC, rowid DESC",
            SESSION_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: &SqliteRow) -> Result<AutoAttendanceSession> {
    let session_id: String = row.get("session_id");
    let stopped_at: Option<String> = row.get("stopped_at");

    Ok(AutoAttendanceSession {
        session_id: Uuid::parse_str(&session_id)
            .map_err(|e| Error::Internal(format!("corrupt session id '{}': {}", session_id, e)))?,
        event_id: row.get("event_id"),
        beacon_identifier: row.get("beacon_identifier"),
        started_at: parse_rfc3339(&row.get::<String, _>("started_at"))?,
        stopped_at: stopped_at.as_deref().map(parse_rfc3339).transpose()?,
        is_active: row.get("is_active"),
    })
}
