//! Shared seeding for integration tests

#![allow(dead_code)]

use chrono::Duration;
use ensemble_common::attendance::{EventId, StudentId};
use ensemble_common::time::{now, to_storage};
use sqlx::SqlitePool;

pub const EVENT: EventId = 42;
pub const UNKNOWN_EVENT: EventId = 4242;
pub const S1: StudentId = 11;
pub const S2: StudentId = 12;
pub const S3: StudentId = 13;
pub const B1: &str = "B1-STAGE-LEFT";
pub const B2: &str = "B2-STAGE-RIGHT";

/// One ensemble, one event in progress, three students, two beacons
pub async fn seed(pool: &SqlitePool) {
    let current = now();

    sqlx::query("INSERT INTO ensembles (ensemble_id, name) VALUES (1, 'Concert Choir')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO events (event_id, ensemble_id, title, room, start_time, end_time) VALUES (?, 1, 'Dress Rehearsal', 'Auditorium', ?, ?)",
    )
    .bind(EVENT)
    .bind(to_storage(&(current - Duration::minutes(10))))
    .bind(to_storage(&(current + Duration::hours(2))))
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO students (student_id, first_name, last_name, email) VALUES
            (11, 'Imani', 'Reyes', 'imani.reyes@example.edu'),
            (12, 'Jonas', 'Berg', NULL),
            (13, 'Kiri', 'Tane', 'kiri.tane@example.edu')
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO ensemble_members (ensemble_id, student_id, section, part, roster_order) VALUES
            (1, 11, 'Soprano', 'S1', 1),
            (1, 12, 'Tenor', 'T2', 2),
            (1, 13, 'Alto', 'A1', 3)
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO beacons (beacon_identifier, label, room) VALUES (?, 'Stage Left', 'Auditorium'), (?, 'Stage Right', 'Auditorium')")
        .bind(B1)
        .bind(B2)
        .execute(pool)
        .await
        .unwrap();
}
