//! Attendance ledger
//!
//! Authoritative per-(event, student) attendance store. Every write, manual
//! or automatic, goes through `apply`, which evaluates the precedence policy
//! inside a single write transaction so a racing manual write and a stale
//! beacon write resolve by policy, not by arrival order.
//!
//! Records are created lazily (unmarked / none) by `ensure`, by the first
//! write, or by the first `read`; the primary key keeps them unique.

pub mod precedence;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ensemble_common::attendance::{
    AttendanceEntry, AttendanceRecord, AttendanceSheet, AttendanceSource, AttendanceStatus, DirectorId,
    EventId, StudentId, WriteAuditEntry, WriteOutcome,
};
use ensemble_common::db::{retry_on_lock, settings};
use ensemble_common::time::{now, parse_rfc3339, to_storage};
use ensemble_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::{EventCatalog, RosterResolver};
use precedence::Decision;

/// A write intent from either channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerWrite {
    pub event_id: EventId,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub source: AttendanceSource,
    pub recorded_by: Option<String>,
    /// Device-side observation time (automatic writes only)
    pub observed_at: Option<DateTime<Utc>>,
}

impl LedgerWrite {
    /// Director edit
    pub fn manual(event_id: EventId, student_id: StudentId, status: AttendanceStatus, director_id: DirectorId) -> Self {
        Self {
            event_id,
            student_id,
            status,
            source: AttendanceSource::Manual,
            recorded_by: Some(director_id.to_string()),
            observed_at: None,
        }
    }

    /// Beacon check-in
    pub fn auto_beacon(
        event_id: EventId,
        student_id: StudentId,
        session_id: Uuid,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            student_id,
            status: AttendanceStatus::Present,
            source: AttendanceSource::AutoBeacon,
            recorded_by: Some(session_id.to_string()),
            observed_at: Some(observed_at),
        }
    }

    fn validate(&self) -> Result<()> {
        match (self.source, self.status) {
            (AttendanceSource::None, _) => Err(Error::Validation(
                "writes must come from the manual or auto_beacon channel".to_string(),
            )),
            (AttendanceSource::AutoBeacon, status) if status != AttendanceStatus::Present => {
                Err(Error::Validation(format!(
                    "automatic writes can only mark students present, got '{}'",
                    status
                )))
            }
            _ => Ok(()),
        }
    }
}

pub struct AttendanceLedger {
    db: SqlitePool,
    roster: Arc<dyn RosterResolver>,
    catalog: Arc<dyn EventCatalog>,
}

impl AttendanceLedger {
    pub fn new(db: SqlitePool, roster: Arc<dyn RosterResolver>, catalog: Arc<dyn EventCatalog>) -> Self {
        Self { db, roster, catalog }
    }

    /// Create `unmarked/none` records for any listed student lacking one
    ///
    /// Idempotent. Returns how many records were created. Every id must be
    /// on the event's roster.
    pub async fn ensure(&self, event_id: EventId, student_ids: &[StudentId]) -> Result<u64> {
        self.require_event(event_id).await?;

        let roster = self.roster.resolve(event_id).await?;
        if let Some(outsider) = student_ids
            .iter()
            .find(|id| !roster.iter().any(|entry| entry.student_id == **id))
        {
            return Err(Error::NotFound(format!(
                "student {} is not on the roster of event {}",
                outsider, event_id
            )));
        }

        self.seed(event_id, student_ids).await
    }

    async fn seed(&self, event_id: EventId, student_ids: &[StudentId]) -> Result<u64> {
        if student_ids.is_empty() {
            return Ok(0);
        }

        let max_wait_ms = settings::max_lock_wait_ms(&self.db).await?;
        let created = retry_on_lock("ensure_records", max_wait_ms, || async move {
            let stamp = to_storage(&now());
            let mut tx = self.db.begin().await?;
            let mut created = 0;
            for student_id in student_ids {
                created += insert_unmarked(&mut tx, event_id, *student_id, &stamp).await?;
            }
            tx.commit().await?;
            Ok(created)
        })
        .await?;

        if created > 0 {
            debug!(event_id, created, "Seeded attendance records");
        }
        Ok(created)
    }

    /// Write a status through the precedence policy
    pub async fn write(
        &self,
        event_id: EventId,
        student_id: StudentId,
        status: AttendanceStatus,
        source: AttendanceSource,
        recorded_by: Option<String>,
    ) -> Result<WriteOutcome> {
        self.apply(LedgerWrite {
            event_id,
            student_id,
            status,
            source,
            recorded_by,
            observed_at: None,
        })
        .await
    }

    /// Apply a write intent
    ///
    /// A precedence rejection is a normal `Ok` outcome, never an error.
    pub async fn apply(&self, write: LedgerWrite) -> Result<WriteOutcome> {
        self.apply_guarded(write, None)
            .await?
            .ok_or_else(|| Error::Internal("unguarded write was dropped".to_string()))
    }

    /// Apply a beacon write only while `session_id` is still the active session
    ///
    /// The session is checked inside the write transaction. Returns `None`
    /// when the session was stopped or superseded first; nothing is written.
    pub async fn apply_in_session(&self, write: LedgerWrite, session_id: Uuid) -> Result<Option<WriteOutcome>> {
        self.apply_guarded(write, Some(session_id)).await
    }

    async fn apply_guarded(&self, write: LedgerWrite, session_id: Option<Uuid>) -> Result<Option<WriteOutcome>> {
        write.validate()?;
        self.require_event(write.event_id).await?;

        let roster = self.roster.resolve(write.event_id).await?;
        if !roster.iter().any(|entry| entry.student_id == write.student_id) {
            return Err(Error::NotFound(format!(
                "student {} is not on the roster of event {}",
                write.student_id, write.event_id
            )));
        }

        let max_wait_ms = settings::max_lock_wait_ms(&self.db).await?;
        let write = &write;
        let outcome = retry_on_lock("attendance_write", max_wait_ms, || self.apply_once(write, session_id)).await?;
        let Some(outcome) = outcome else {
            debug!(
                event_id = write.event_id,
                student_id = write.student_id,
                "Dropped beacon write: session no longer active"
            );
            return Ok(None);
        };

        match &outcome {
            WriteOutcome::Applied(record) => info!(
                event_id = record.event_id,
                student_id = record.student_id,
                status = %record.status,
                source = %record.source,
                "Attendance updated"
            ),
            WriteOutcome::Unchanged(record) => debug!(
                event_id = record.event_id,
                student_id = record.student_id,
                "Repeated beacon check-in, status unchanged"
            ),
            WriteOutcome::PrecedenceRejected(record) => info!(
                event_id = record.event_id,
                student_id = record.student_id,
                status = %record.status,
                "Ignored automatic write: manually marked"
            ),
        }

        Ok(Some(outcome))
    }

    async fn apply_once(&self, write: &LedgerWrite, session_id: Option<Uuid>) -> Result<Option<WriteOutcome>> {
        let at = now();
        let stamp = to_storage(&at);
        let mut tx = self.db.begin().await?;

        // Lazy create; as the first statement it also takes the write lock
        // before the current record is read
        insert_unmarked(&mut tx, write.event_id, write.student_id, &stamp).await?;
        let current = fetch_record(&mut tx, write.event_id, write.student_id)
            .await?
            .ok_or_else(|| Error::Internal("attendance record vanished inside transaction".to_string()))?;

        if let Some(session_id) = session_id {
            if !session_is_active(&mut tx, write.event_id, session_id).await? {
                return Ok(None);
            }
        }

        let outcome = match precedence::decide(&current, write.source, write.status) {
            Decision::Apply => {
                let next = precedence::applied(&current, write.source, write.status, write.recorded_by.clone(), at);
                store_record(&mut tx, &next).await?;
                WriteOutcome::Applied(next)
            }
            Decision::Refresh => {
                let next = precedence::refreshed(&current, at);
                store_record(&mut tx, &next).await?;
                WriteOutcome::Unchanged(next)
            }
            Decision::Reject => WriteOutcome::PrecedenceRejected(current),
        };

        // Idempotent refreshes are not audited
        if !matches!(outcome, WriteOutcome::Unchanged(_)) {
            insert_audit(&mut tx, write, outcome.as_str(), &stamp).await?;
        }

        tx.commit().await?;
        Ok(Some(outcome))
    }

    /// Merged attendance for an event, in roster order
    pub async fn read(&self, event_id: EventId) -> Result<AttendanceSheet> {
        self.require_event(event_id).await?;
        let roster = self.roster.resolve(event_id).await?;

        let mut records = self.records_by_student(event_id).await?;
        let missing: Vec<StudentId> = roster
            .iter()
            .map(|entry| entry.student_id)
            .filter(|id| !records.contains_key(id))
            .collect();
        if !missing.is_empty() {
            self.seed(event_id, &missing).await?;
            records = self.records_by_student(event_id).await?;
        }

        let mut entries = Vec::with_capacity(roster.len());
        for student in roster {
            let record = records
                .remove(&student.student_id)
                .ok_or_else(|| Error::Internal(format!("record for student {} missing after ensure", student.student_id)))?;
            entries.push(AttendanceEntry { student, record });
        }

        Ok(AttendanceSheet::new(event_id, entries, now()))
    }

    /// Current record, if one has been created
    pub async fn record(&self, event_id: EventId, student_id: StudentId) -> Result<Option<AttendanceRecord>> {
        let mut conn = self.db.acquire().await?;
        fetch_record(&mut conn, event_id, student_id).await
    }

    /// Applied and rejected writes for one record, oldest first
    pub async fn audit(&self, event_id: EventId, student_id: StudentId) -> Result<Vec<WriteAuditEntry>> {
        self.require_event(event_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT event_id, student_id, requested_status, requested_source,
                   recorded_by, outcome, observed_at, written_at
            FROM attendance_writes
            WHERE event_id = ? AND student_id = ?
            ORDER BY write_id
            "#,
        )
        .bind(event_id)
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }

    async fn records_by_student(&self, event_id: EventId) -> Result<HashMap<StudentId, AttendanceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, student_id, status, source, recorded_by, updated_at
            FROM attendance_records
            WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| record_from_row(row).map(|record| (record.student_id, record)))
            .collect()
    }

    async fn require_event(&self, event_id: EventId) -> Result<()> {
        if self.catalog.exists(event_id).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("event {}", event_id)))
        }
    }
}

async fn insert_unmarked(
    conn: &mut SqliteConnection,
    event_id: EventId,
    student_id: StudentId,
    stamp: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO attendance_records (event_id, student_id, status, source, updated_at)
        VALUES (?, ?, 'unmarked', 'none', ?)
        "#,
    )
    .bind(event_id)
    .bind(student_id)
    .bind(stamp)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    event_id: EventId,
    student_id: StudentId,
) -> Result<Option<AttendanceRecord>> {
    let row = sqlx::query(
        r#"
        SELECT event_id, student_id, status, source, recorded_by, updated_at
        FROM attendance_records
        WHERE event_id = ? AND student_id = ?
        "#,
    )
    .bind(event_id)
    .bind(student_id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

async fn store_record(conn: &mut SqliteConnection, record: &AttendanceRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE attendance_records
        SET status = ?, source = ?, recorded_by = ?, updated_at = ?
        WHERE event_id = ? AND student_id = ?
        "#,
    )
    .bind(record.status.as_str())
    .bind(record.source.as_str())
    .bind(&record.recorded_by)
    .bind(to_storage(&record.updated_at))
    .bind(record.event_id)
    .bind(record.student_id)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_audit(conn: &mut SqliteConnection, write: &LedgerWrite, outcome: &str, stamp: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO attendance_writes (
            event_id, student_id, requested_status, requested_source,
            recorded_by, outcome, observed_at, written_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(write.event_id)
    .bind(write.student_id)
    .bind(write.status.as_str())
    .bind(write.source.as_str())
    .bind(&write.recorded_by)
    .bind(outcome)
    .bind(write.observed_at.as_ref().map(to_storage))
    .bind(stamp)
    .execute(conn)
    .await?;

    Ok(())
}

async fn session_is_active(conn: &mut SqliteConnection, event_id: EventId, session_id: Uuid) -> Result<bool> {
    let active: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM auto_attendance_sessions
            WHERE session_id = ? AND event_id = ? AND is_active = 1
        )
        "#,
    )
    .bind(session_id.to_string())
    .bind(event_id)
    .fetch_one(conn)
    .await?;

    Ok(active)
}

fn record_from_row(row: &SqliteRow) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        event_id: row.get("event_id"),
        student_id: row.get("student_id"),
        status: parse_stored(row.get::<String, _>("status").as_str())?,
        source: parse_stored(row.get::<String, _>("source").as_str())?,
        recorded_by: row.get("recorded_by"),
        updated_at: parse_rfc3339(&row.get::<String, _>("updated_at"))?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<WriteAuditEntry> {
    let observed_at: Option<String> = row.get("observed_at");
    Ok(WriteAuditEntry {
        event_id: row.get("event_id"),
        student_id: row.get("student_id"),
        requested_status: parse_stored(row.get::<String, _>("requested_status").as_str())?,
        requested_source: parse_stored(row.get::<String, _>("requested_source").as_str())?,
        recorded_by: row.get("recorded_by"),
        outcome: row.get("outcome"),
        observed_at: observed_at.as_deref().map(parse_rfc3339).transpose()?,
        written_at: parse_rfc3339(&row.get::<String, _>("written_at"))?,
    })
}

/// Stored enum text that fails to parse is corruption, not caller error
fn parse_stored<T: std::str::FromStr<Err = Error>>(raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|e| Error::Internal(format!("corrupt attendance row: {}", e)))
}
