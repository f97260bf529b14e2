//! Auto-attendance session endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use ensemble_common::attendance::{AutoAttendanceSession, EventId, SessionStatus};
use serde::{Deserialize, Serialize};

use super::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Missing and blank are both rejected by the session manager
    #[serde(default)]
    pub beacon_identifier: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub event_id: EventId,
    pub is_active: bool,
    /// Session that was stopped, absent when none was active
    pub stopped: Option<AutoAttendanceSession>,
}

/// GET /api/events/:event_id/session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<Json<SessionStatus>> {
    Ok(Json(state.sessions.status(event_id).await?))
}

/// POST /api/events/:event_id/session/start
pub async fn start_session(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<AutoAttendanceSession>> {
    let session = state.sessions.start(event_id, &request.beacon_identifier).await?;
    Ok(Json(session))
}

/// POST /api/events/:event_id/session/stop
pub async fn stop_session(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<Json<StopSessionResponse>> {
    let stopped = state.sessions.stop(event_id).await?;
    Ok(Json(StopSessionResponse {
        event_id,
        is_active: false,
        stopped,
    }))
}

/// GET /api/events/:event_id/sessions
pub async fn get_session_history(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<Json<Vec<AutoAttendanceSession>>> {
    Ok(Json(state.sessions.history(event_id).await?))
}
