//! Live view settings endpoint

use axum::{extract::State, Json};
use ensemble_common::db::settings;
use serde::{Deserialize, Serialize};

use super::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct LiveViewSettings {
    pub poll_interval_ms: u64,
}

/// GET /api/settings/live-view
pub async fn get_live_view_settings(State(state): State<AppState>) -> ApiResult<Json<LiveViewSettings>> {
    let interval = settings::poll_interval(&state.db).await?;
    Ok(Json(LiveViewSettings {
        poll_interval_ms: interval.as_millis() as u64,
    }))
}
