//! Beacon check-in endpoint
//!
//! Discarded observations are a normal 200 response; only malformed
//! requests and storage failures are errors.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use ensemble_common::attendance::{EventId, IngestOutcome, PresenceObservation};
use ensemble_common::time::now;
use serde::Deserialize;

use super::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ObservationRequest {
    pub student_identifier: String,
    pub beacon_identifier: String,
    /// Device-side timestamp, defaults to receipt time
    pub observed_at: Option<DateTime<Utc>>,
}

/// POST /api/events/:event_id/observations
pub async fn post_observation(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(request): Json<ObservationRequest>,
) -> ApiResult<Json<IngestOutcome>> {
    let observation = PresenceObservation {
        event_id,
        student_identifier: request.student_identifier,
        beacon_identifier: request.beacon_identifier,
        observed_at: request.observed_at.unwrap_or_else(now),
    };

    Ok(Json(state.ingest.observe(observation).await?))
}
