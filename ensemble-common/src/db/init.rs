//! Database initialization
//!
//! Creates the database on first run, creates every table idempotently,
//! runs migrations and seeds default settings. Safe to call on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Busy timeout used until the settings table has been read
const BOOTSTRAP_BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection and create tables if needed
///
/// The pool is reopened once the configured `database_busy_timeout_ms`
/// is known so every connection waits a bounded time on a held lock.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bootstrap = open_file_pool(db_path, BOOTSTRAP_BUSY_TIMEOUT_MS).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&bootstrap).await?;
    crate::db::migrations::run_migrations(&bootstrap).await?;
    init_default_settings(&bootstrap).await?;

    let timeout_ms = crate::db::settings::busy_timeout_ms(&bootstrap).await?;
    if timeout_ms == BOOTSTRAP_BUSY_TIMEOUT_MS {
        info!("Database busy timeout set to {} ms", timeout_ms);
        return Ok(bootstrap);
    }

    bootstrap.close().await;
    let pool = open_file_pool(db_path, timeout_ms).await?;
    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

/// Initialize a private in-memory database with the full schema
///
/// Single connection that never expires, so the database lives as long
/// as the pool. Intended for tests and throwaway demos.
pub async fn init_database_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BOOTSTRAP_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn open_file_pool(db_path: &Path, busy_timeout_ms: u64) -> Result<SqlitePool> {
    // WAL lets readers proceed while a single writer holds the lock
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create every table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Collaborator tables: roster, event catalog, beacon registry
    create_ensembles_table(pool).await?;
    create_events_table(pool).await?;
    create_students_table(pool).await?;
    create_ensemble_members_table(pool).await?;
    create_beacons_table(pool).await?;

    // Attendance core
    create_attendance_records_table(pool).await?;
    create_attendance_writes_table(pool).await?;
    create_auto_attendance_sessions_table(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ensembles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ensembles (
            ensemble_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            event_id INTEGER PRIMARY KEY,
            ensemble_id INTEGER NOT NULL REFERENCES ensembles(ensemble_id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            room TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            student_id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ensemble_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ensemble_members (
            ensemble_id INTEGER NOT NULL REFERENCES ensembles(ensemble_id) ON DELETE CASCADE,
            student_id INTEGER NOT NULL REFERENCES students(student_id) ON DELETE CASCADE,
            section TEXT,
            part TEXT,
            roster_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (ensemble_id, student_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_beacons_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS beacons (
            beacon_identifier TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            room TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            event_id INTEGER NOT NULL REFERENCES events(event_id) ON DELETE CASCADE,
            student_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'unmarked'
                CHECK (status IN ('unmarked', 'present', 'absent', 'late', 'excused')),
            source TEXT NOT NULL DEFAULT 'none'
                CHECK (source IN ('manual', 'auto_beacon', 'none')),
            recorded_by TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (event_id, student_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_writes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_writes (
            write_id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL REFERENCES events(event_id) ON DELETE CASCADE,
            student_id INTEGER NOT NULL,
            requested_status TEXT NOT NULL,
            requested_source TEXT NOT NULL,
            recorded_by TEXT,
            outcome TEXT NOT NULL CHECK (outcome IN ('applied', 'precedence_rejected')),
            observed_at TEXT,
            written_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_auto_attendance_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS auto_attendance_sessions (
            session_id TEXT PRIMARY KEY,
            event_id INTEGER NOT NULL REFERENCES events(event_id) ON DELETE CASCADE,
            beacon_identifier TEXT NOT NULL,
            started_at TEXT NOT NULL,
            stopped_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
            CHECK ((is_active = 1 AND stopped_at IS NULL) OR (is_active = 0 AND stopped_at IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Storage-level guard: never two active sessions for one event
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
        ON auto_attendance_sessions(event_id) WHERE is_active = 1
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Missing settings are created; NULL values are reset to the default.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    use crate::db::settings::keys;

    ensure_setting(pool, keys::POLL_INTERVAL_MS, "5000").await?;
    ensure_setting(pool, keys::MAX_LOCK_WAIT_MS, "5000").await?;
    ensure_setting(pool, keys::BUSY_TIMEOUT_MS, "250").await?;
    ensure_setting(pool, keys::SESSION_WINDOW_GRACE_MINUTES, "15").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    // INSERT OR IGNORE tolerates two processes initializing concurrently
    let inserted = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default_value)
        .execute(pool)
        .await?
        .rows_affected();

    if inserted > 0 {
        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default_value)
        .bind(key)
        .execute(pool)
        .await?
        .rows_affected();

    if reset > 0 {
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}
