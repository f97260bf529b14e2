//! Attendance sheet and manual edit endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use ensemble_common::attendance::{
    AttendanceSheet, AttendanceStatus, DirectorId, EventId, StudentId, WriteAuditEntry, WriteOutcome,
};
use ensemble_common::Error;
use serde::Deserialize;

use super::error::ApiResult;
use crate::ledger::LedgerWrite;
use crate::AppState;

/// Manual status edit
///
/// `status` stays a string so unknown values surface as a validation error.
#[derive(Debug, Deserialize)]
pub struct ManualWriteRequest {
    #[serde(default)]
    pub status: String,
    pub director_id: Option<DirectorId>,
}

/// GET /api/events/:event_id/attendance
pub async fn get_attendance(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<Json<AttendanceSheet>> {
    Ok(Json(state.ledger.read(event_id).await?))
}

/// PUT /api/events/:event_id/attendance/:student_id
pub async fn put_attendance(
    State(state): State<AppState>,
    Path((event_id, student_id)): Path<(EventId, StudentId)>,
    Json(request): Json<ManualWriteRequest>,
) -> ApiResult<Json<WriteOutcome>> {
    let status: AttendanceStatus = request.status.parse()?;
    let director_id = request
        .director_id
        .ok_or_else(|| Error::Validation("director_id is required".to_string()))?;

    let outcome = state
        .ledger
        .apply(LedgerWrite::manual(event_id, student_id, status, director_id))
        .await?;

    Ok(Json(outcome))
}

/// GET /api/events/:event_id/attendance/:student_id/audit
pub async fn get_audit(
    State(state): State<AppState>,
    Path((event_id, student_id)): Path<(EventId, StudentId)>,
) -> ApiResult<Json<Vec<WriteAuditEntry>>> {
    Ok(Json(state.ledger.audit(event_id, student_id).await?))
}
