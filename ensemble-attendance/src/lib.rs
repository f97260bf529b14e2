//! ensemble-attendance - attendance tracking and reconciliation
//!
//! Two channels mark students present: beacon-driven automatic check-in
//! and manual director edits. The ledger merges them into one status per
//! (event, student) under a single precedence policy; views poll the
//! ledger through the live view synchronizer.

use std::sync::Arc;

use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod directory;
pub mod ingest;
pub mod ledger;
pub mod sessions;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_fixtures;

use directory::{BeaconRegistry, EventCatalog, RosterResolver, SqliteDirectory};
use ingest::PresenceIngest;
use ledger::AttendanceLedger;
use sessions::BeaconSessionManager;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub sessions: Arc<BeaconSessionManager>,
    pub ledger: Arc<AttendanceLedger>,
    pub ingest: Arc<PresenceIngest>,
}

impl AppState {
    /// Wire the core against collaborators stored in the same database
    pub fn new(db: SqlitePool) -> Self {
        let directory = Arc::new(SqliteDirectory::new(db.clone()));
        Self::with_collaborators(db, directory.clone(), directory.clone(), directory)
    }

    pub fn with_collaborators(
        db: SqlitePool,
        roster: Arc<dyn RosterResolver>,
        beacons: Arc<dyn BeaconRegistry>,
        catalog: Arc<dyn EventCatalog>,
    ) -> Self {
        let sessions = Arc::new(BeaconSessionManager::new(db.clone(), beacons, catalog.clone()));
        let ledger = Arc::new(AttendanceLedger::new(db.clone(), roster.clone(), catalog.clone()));
        let ingest = Arc::new(PresenceIngest::new(
            sessions.clone(),
            ledger.clone(),
            roster,
            catalog,
        ));

        Self {
            db,
            sessions,
            ledger,
            ingest,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let events = Router::new()
        .route("/api/events/:event_id/session", get(api::get_session_status))
        .route("/api/events/:event_id/session/start", post(api::start_session))
        .route("/api/events/:event_id/session/stop", post(api::stop_session))
        .route("/api/events/:event_id/sessions", get(api::get_session_history))
        .route("/api/events/:event_id/attendance", get(api::get_attendance))
        .route(
            "/api/events/:event_id/attendance/:student_id",
            axum::routing::put(api::put_attendance),
        )
        .route(
            "/api/events/:event_id/attendance/:student_id/audit",
            get(api::get_audit),
        )
        .route("/api/events/:event_id/observations", post(api::post_observation));

    Router::new()
        .merge(events)
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/api/settings/live-view", get(api::get_live_view_settings))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
