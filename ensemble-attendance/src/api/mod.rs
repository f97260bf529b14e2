//! HTTP handlers for the attendance service

pub mod attendance;
pub mod buildinfo;
pub mod error;
pub mod health;
pub mod observations;
pub mod sessions;
pub mod settings;

pub use attendance::{get_attendance, get_audit, put_attendance};
pub use buildinfo::get_build_info;
pub use error::ApiError;
pub use health::health_routes;
pub use observations::post_observation;
pub use sessions::{get_session_history, get_session_status, start_session, stop_session};
pub use settings::get_live_view_settings;
