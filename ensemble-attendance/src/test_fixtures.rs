//! Seeded in-memory database shared by unit tests

use std::sync::Arc;

use chrono::Duration;
use ensemble_common::attendance::{EventId, StudentId};
use ensemble_common::db::init_database_in_memory;
use ensemble_common::time::{now, to_storage};
use sqlx::SqlitePool;

use crate::directory::SqliteDirectory;

/// Rehearsal in progress (ensemble 1)
pub const EVENT: EventId = 100;
/// Yesterday's rehearsal (ensemble 1)
pub const OTHER_EVENT: EventId = 101;
/// Ensemble 1 members, in roster order
pub const STUDENTS: [StudentId; 3] = [1, 2, 3];
/// Member of ensemble 2 only
pub const OUTSIDER: StudentId = 9;
pub const BEACON: &str = "BEACON-A";
pub const OTHER_BEACON: &str = "BEACON-B";

pub struct Fixture {
    pub db: SqlitePool,
    pub directory: Arc<SqliteDirectory>,
}

pub async fn fixture() -> Fixture {
    let db = init_database_in_memory().await.unwrap();
    let current = now();
    let yesterday = current - Duration::days(1);

    sqlx::query("INSERT INTO ensembles (ensemble_id, name) VALUES (1, 'Wind Symphony'), (2, 'Jazz Band')")
        .execute(&db)
        .await
        .unwrap();
    sqlx::query(
        r#"
        INSERT INTO events (event_id, ensemble_id, title, room, start_time, end_time)
        VALUES (?, 1, 'Rehearsal', 'Band Room', ?, ?), (?, 1, 'Rehearsal', 'Band Room', ?, ?)
        "#,
    )
    .bind(EVENT)
    .bind(to_storage(&(current - Duration::minutes(30))))
    .bind(to_storage(&(current + Duration::minutes(90))))
    .bind(OTHER_EVENT)
    .bind(to_storage(&(yesterday - Duration::hours(2))))
    .bind(to_storage(&yesterday))
    .execute(&db)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO students (student_id, first_name, last_name, email) VALUES
            (1, 'Ada', 'Okafor', 'ada.okafor@example.edu'),
            (2, 'Ben', 'Lindqvist', 'ben.lindqvist@example.edu'),
            (3, 'Chen', 'Alvarez', NULL),
            (9, 'Dana', 'Moreau', 'dana.moreau@example.edu')
        "#,
    )
    .execute(&db)
    .await
    .unwrap();
    sqlx::query(
        r#"
        INSERT INTO ensemble_members (ensemble_id, student_id, section, part, roster_order) VALUES
            (1, 1, 'Woodwinds', 'Flute 1', 1),
            (1, 2, 'Brass', 'Trumpet 2', 2),
            (1, 3, 'Percussion', NULL, 3),
            (2, 9, 'Rhythm', 'Bass', 1)
        "#,
    )
    .execute(&db)
    .await
    .unwrap();
    sqlx::query("INSERT INTO beacons (beacon_identifier, label, room) VALUES (?, 'Band Room', 'Band Room'), (?, 'Choir Loft', NULL)")
        .bind(BEACON)
        .bind(OTHER_BEACON)
        .execute(&db)
        .await
        .unwrap();

    let directory = Arc::new(SqliteDirectory::new(db.clone()));
    Fixture { db, directory }
}
