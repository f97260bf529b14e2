//! Timestamp utilities
//!
//! All timestamps are persisted as RFC 3339 text in UTC.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use tracing::warn;

use crate::{Error, Result};

/// Current UTC time at storage precision (milliseconds)
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Format a timestamp for storage
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp
///
/// Strict: a missing timezone suffix is an error.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", s, e)))
}

/// Parse a timestamp that may lack a timezone suffix
///
/// Naive timestamps are read as UTC and a warning is logged so the
/// upstream writer can be fixed. Only collaborator data goes through here.
pub fn parse_lenient_utc(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            warn!(timestamp = s, "Timestamp has no timezone suffix, assuming UTC");
            return Ok(naive.and_utc());
        }
    }

    Err(Error::Internal(format!("Unrecognized timestamp: '{}'", s)))
}
