//! Precedence policy between manual and automatic writes
//!
//! - Manual writes always apply (last write wins between directors).
//! - A manual write pins the record; automatic writes on a pinned record
//!   are audited but never change the visible status or source.
//! - A manual write of `unmarked` un-pins the record (`source` back to `none`).
//! - An automatic write matching the current automatic status is a refresh:
//!   only `updated_at` moves.
//!
//! Pure functions: the ledger evaluates them inside its write transaction.

use chrono::{DateTime, Utc};
use ensemble_common::attendance::{AttendanceRecord, AttendanceSource, AttendanceStatus};

/// What the ledger does with an incoming write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    Refresh,
    Reject,
}

pub fn decide(current: &AttendanceRecord, source: AttendanceSource, status: AttendanceStatus) -> Decision {
    match source {
        AttendanceSource::Manual => Decision::Apply,
        AttendanceSource::AutoBeacon if current.is_pinned() => Decision::Reject,
        AttendanceSource::AutoBeacon
            if current.source == AttendanceSource::AutoBeacon && current.status == status =>
        {
            Decision::Refresh
        }
        AttendanceSource::AutoBeacon => Decision::Apply,
        // Validated away before reaching the ledger
        AttendanceSource::None => Decision::Reject,
    }
}

/// Record as it looks after an applied write
pub fn applied(
    current: &AttendanceRecord,
    source: AttendanceSource,
    status: AttendanceStatus,
    recorded_by: Option<String>,
    at: DateTime<Utc>,
) -> AttendanceRecord {
    let source = match (source, status) {
        (AttendanceSource::Manual, AttendanceStatus::Unmarked) => AttendanceSource::None,
        (source, _) => source,
    };

    AttendanceRecord {
        event_id: current.event_id,
        student_id: current.student_id,
        status,
        source,
        updated_at: at,
        recorded_by,
    }
}

/// Record as it looks after a refresh
pub fn refreshed(current: &AttendanceRecord, at: DateTime<Utc>) -> AttendanceRecord {
    AttendanceRecord {
        updated_at: at,
        ..current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceSource::{AutoBeacon, Manual};
    use AttendanceStatus::*;

    fn record(status: AttendanceStatus, source: AttendanceSource) -> AttendanceRecord {
        AttendanceRecord {
            status,
            source,
            ..AttendanceRecord::unmarked(1, 1, Utc::now())
        }
    }

    #[test]
    fn test_manual_always_applies() {
        for status in AttendanceStatus::ALL {
            for source in [Manual, AutoBeacon, AttendanceSource::None] {
                assert_eq!(decide(&record(status, source), Manual, Present), Decision::Apply);
            }
        }
    }

    #[test]
    fn test_auto_rejected_on_pinned_record() {
        for status in AttendanceStatus::ALL {
            assert_eq!(decide(&record(status, Manual), AutoBeacon, Present), Decision::Reject);
        }
    }

    #[test]
    fn test_auto_applies_on_unpinned_record() {
        assert_eq!(decide(&record(Unmarked, AttendanceSource::None), AutoBeacon, Present), Decision::Apply);
        // An automatic record with a different status is overwritten
        assert_eq!(decide(&record(Absent, AutoBeacon), AutoBeacon, Present), Decision::Apply);
    }

    #[test]
    fn test_repeated_auto_present_is_refresh() {
        assert_eq!(decide(&record(Present, AutoBeacon), AutoBeacon, Present), Decision::Refresh);
    }

    #[test]
    fn test_manual_unmarked_unpins() {
        let current = record(Absent, Manual);
        let next = applied(&current, Manual, Unmarked, Some("4".to_string()), Utc::now());
        assert_eq!(next.status, Unmarked);
        assert_eq!(next.source, AttendanceSource::None);
        assert!(!next.is_pinned());
        assert_eq!(decide(&next, AutoBeacon, Present), Decision::Apply);
    }

    #[test]
    fn test_manual_write_pins() {
        let next = applied(&record(Present, AutoBeacon), Manual, Absent, Some("4".to_string()), Utc::now());
        assert_eq!(next.status, Absent);
        assert_eq!(next.source, Manual);
        assert!(next.is_pinned());
    }

    #[test]
    fn test_refresh_only_moves_timestamp() {
        let current = record(Present, AutoBeacon);
        let later = current.updated_at + chrono::Duration::seconds(30);
        let next = refreshed(&current, later);
        assert_eq!(next.status, current.status);
        assert_eq!(next.source, current.source);
        assert_eq!(next.recorded_by, current.recorded_by);
        assert_eq!(next.updated_at, later);
    }
}
