//! # Ensemble Common Library
//!
//! Shared code for the ensemble console services including:
//! - Attendance domain model (records, sessions, sheets)
//! - Database initialization, migrations and settings
//! - Configuration loading and root folder resolution
//! - Error taxonomy and timestamp utilities

pub mod attendance;
pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
