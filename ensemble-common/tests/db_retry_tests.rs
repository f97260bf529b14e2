//! Lock-contention retry against a real SQLite write lock

use ensemble_common::db::{init_database, retry_on_lock};
use ensemble_common::Error;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, SqliteConnection};
use std::path::Path;
use std::time::Duration;

async fn hold_write_lock(db_path: &Path) -> SqliteConnection {
    let mut holder = SqliteConnectOptions::new()
        .filename(db_path)
        .connect()
        .await
        .unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut holder).await.unwrap();
    holder
}

#[tokio::test]
async fn test_retry_succeeds_once_lock_released() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ensemble.db");
    let pool = init_database(&db_path).await.unwrap();

    let mut holder = hold_write_lock(&db_path).await;
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        sqlx::query("COMMIT").execute(&mut holder).await.unwrap();
        holder
    });

    let pool_ref = &pool;
    let result = retry_on_lock("insert_setting", 5000, || async move {
        sqlx::query("INSERT INTO settings (key, value) VALUES ('retry_probe', '1')")
            .execute(pool_ref)
            .await?;
        Ok(())
    })
    .await;

    assert!(result.is_ok(), "expected success after release, got {:?}", result.err());
    release.await.unwrap();
}

#[tokio::test]
async fn test_retry_exhaustion_is_transient() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ensemble.db");
    let pool = init_database(&db_path).await.unwrap();

    let _holder = hold_write_lock(&db_path).await;

    let pool_ref = &pool;
    let result = retry_on_lock("insert_setting", 300, || async move {
        sqlx::query("INSERT INTO settings (key, value) VALUES ('retry_probe', '1')")
            .execute(pool_ref)
            .await?;
        Ok(())
    })
    .await;

    match result {
        Err(err @ Error::Transient(_)) => assert!(err.is_retryable()),
        other => panic!("expected Transient, got {:?}", other),
    }
}
