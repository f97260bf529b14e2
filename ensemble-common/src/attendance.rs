//! Attendance domain model
//!
//! Types shared between the attendance service and its polling clients.
//! Wire representation of every enum is snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Event identifier (owned by the event catalog)
pub type EventId = i64;

/// Student identifier (owned by the roster)
pub type StudentId = i64;

/// Director identifier, recorded on manual writes
pub type DirectorId = i64;

/// Visible attendance status of one student at one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Unmarked,
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 5] = [
        AttendanceStatus::Unmarked,
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
        AttendanceStatus::Excused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Unmarked => "unmarked",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttendanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown attendance status: '{}'", s)))
    }
}

/// Channel that last wrote a record's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceSource {
    Manual,
    AutoBeacon,
    None,
}

impl AttendanceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceSource::Manual => "manual",
            AttendanceSource::AutoBeacon => "auto_beacon",
            AttendanceSource::None => "none",
        }
    }
}

impl fmt::Display for AttendanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(AttendanceSource::Manual),
            "auto_beacon" => Ok(AttendanceSource::AutoBeacon),
            "none" => Ok(AttendanceSource::None),
            other => Err(Error::Validation(format!("Unknown attendance source: '{}'", other))),
        }
    }
}

/// One record per (event, student)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub event_id: EventId,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub source: AttendanceSource,
    pub updated_at: DateTime<Utc>,
    /// Director id (manual) or beacon session id (auto)
    pub recorded_by: Option<String>,
}

impl AttendanceRecord {
    /// Fresh record as created by `ensure` or lazily on first touch
    pub fn unmarked(event_id: EventId, student_id: StudentId, at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            student_id,
            status: AttendanceStatus::Unmarked,
            source: AttendanceSource::None,
            updated_at: at,
            recorded_by: None,
        }
    }

    /// A manual write pins the record against automatic writes
    pub fn is_pinned(&self) -> bool {
        self.source == AttendanceSource::Manual
    }
}

/// Roster member as supplied by the roster resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub student_id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub section: Option<String>,
    pub part: Option<String>,
    pub email: Option<String>,
}

impl RosterEntry {
    /// Match a check-in client's identifier: numeric student id or email
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        if let Ok(id) = identifier.parse::<StudentId>() {
            return id == self.student_id;
        }
        self.email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(identifier))
    }
}

/// Record joined with roster metadata for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub student: RosterEntry,
    pub record: AttendanceRecord,
}

/// Per-status counts over a sheet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub total: usize,
    pub unmarked: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

impl AttendanceSummary {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            match record.status {
                AttendanceStatus::Unmarked => summary.unmarked += 1,
                AttendanceStatus::Present => summary.present += 1,
                AttendanceStatus::Absent => summary.absent += 1,
                AttendanceStatus::Late => summary.late += 1,
                AttendanceStatus::Excused => summary.excused += 1,
            }
        }
        summary
    }
}

/// Merged attendance for one event, in roster order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSheet {
    pub event_id: EventId,
    pub entries: Vec<AttendanceEntry>,
    pub summary: AttendanceSummary,
    pub generated_at: DateTime<Utc>,
}

impl AttendanceSheet {
    pub fn new(event_id: EventId, entries: Vec<AttendanceEntry>, generated_at: DateTime<Utc>) -> Self {
        let summary = AttendanceSummary::tally(entries.iter().map(|e| &e.record));
        Self {
            event_id,
            entries,
            summary,
            generated_at,
        }
    }

    pub fn record_for(&self, student_id: StudentId) -> Option<&AttendanceRecord> {
        self.entries
            .iter()
            .find(|entry| entry.student.student_id == student_id)
            .map(|entry| &entry.record)
    }
}

/// Scheduled window of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Automatic attendance session bound to one event and one beacon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoAttendanceSession {
    pub session_id: Uuid,
    pub event_id: EventId,
    pub beacon_identifier: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Session status for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub event_id: EventId,
    pub is_active: bool,
    pub session: Option<AutoAttendanceSession>,
    pub beacon_label: Option<String>,
    pub window: Option<EventWindow>,
    /// Informational: the session is still running past the event window
    pub past_window: bool,
}

/// A device seen near a beacon; never persisted on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceObservation {
    pub event_id: EventId,
    pub student_identifier: String,
    pub beacon_identifier: String,
    pub observed_at: DateTime<Utc>,
}

/// Result of a ledger write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Status and source changed as requested
    Applied(AttendanceRecord),
    /// Repeated beacon write on an already auto-present record
    Unchanged(AttendanceRecord),
    /// Automatic write on a manually pinned record; audited, not visible
    PrecedenceRejected(AttendanceRecord),
}

impl WriteOutcome {
    /// Resulting visible record
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            WriteOutcome::Applied(r) | WriteOutcome::Unchanged(r) | WriteOutcome::PrecedenceRejected(r) => r,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, WriteOutcome::PrecedenceRejected(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Applied(_) => "applied",
            WriteOutcome::Unchanged(_) => "unchanged",
            WriteOutcome::PrecedenceRejected(_) => "precedence_rejected",
        }
    }
}

/// Why a presence observation was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    UnknownEvent,
    NoActiveSession,
    BeaconMismatch,
    UnknownStudent,
}

/// Result of a presence observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum IngestOutcome {
    Recorded(WriteOutcome),
    Discarded(DiscardReason),
}

/// One row of the write audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAuditEntry {
    pub event_id: EventId,
    pub student_id: StudentId,
    pub requested_status: AttendanceStatus,
    pub requested_source: AttendanceSource,
    pub recorded_by: Option<String>,
    pub outcome: String,
    pub observed_at: Option<DateTime<Utc>>,
    pub written_at: DateTime<Utc>,
}
