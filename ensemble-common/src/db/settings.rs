//! Settings database access
//!
//! Runtime tunables in the `settings` key-value table. Defaults are seeded
//! by `init_database`; the getters below fall back to the same defaults
//! when a key is missing or unparsable.

use crate::Result;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Setting keys
pub mod keys {
    /// Live view polling interval
    pub const POLL_INTERVAL_MS: &str = "attendance_poll_interval_ms";
    /// Total retry budget for transient lock contention
    pub const MAX_LOCK_WAIT_MS: &str = "database_max_lock_wait_ms";
    /// SQLite busy_timeout per statement
    pub const BUSY_TIMEOUT_MS: &str = "database_busy_timeout_ms";
    /// Slack after the event's end before a session is flagged as past its window
    pub const SESSION_WINDOW_GRACE_MINUTES: &str = "session_window_grace_minutes";
}

/// Read a setting, `None` when missing or NULL
pub async fn get_setting<T: FromStr>(pool: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value.flatten() {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => {
                warn!("Setting '{}' has unparsable value '{}', using default", key, raw);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Write a setting
pub async fn set_setting<T: ToString>(pool: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn poll_interval(pool: &SqlitePool) -> Result<Duration> {
    let ms = get_setting::<u64>(pool, keys::POLL_INTERVAL_MS).await?.unwrap_or(5000);
    Ok(Duration::from_millis(ms.max(100)))
}

pub async fn max_lock_wait_ms(pool: &SqlitePool) -> Result<u64> {
    Ok(get_setting::<u64>(pool, keys::MAX_LOCK_WAIT_MS).await?.unwrap_or(5000))
}

pub async fn busy_timeout_ms(pool: &SqlitePool) -> Result<u64> {
    Ok(get_setting::<u64>(pool, keys::BUSY_TIMEOUT_MS).await?.unwrap_or(250))
}

pub async fn session_window_grace(pool: &SqlitePool) -> Result<chrono::Duration> {
    let minutes = get_setting::<i64>(pool, keys::SESSION_WINDOW_GRACE_MINUTES)
        .await?
        .unwrap_or(15);
    Ok(chrono::Duration::minutes(minutes.max(0)))
}
