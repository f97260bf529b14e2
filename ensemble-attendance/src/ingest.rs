//! Presence ingest
//!
//! Turns beacon observations into automatic ledger writes. Observations
//! that do not belong to the event's active session, or whose student
//! cannot be resolved, are discarded with a debug log: foreign and stale
//! beacon chatter is expected and never surfaces as an error.

use std::sync::Arc;

use ensemble_common::attendance::{DiscardReason, IngestOutcome, PresenceObservation};
use ensemble_common::Result;
use tracing::debug;

use crate::directory::{EventCatalog, RosterResolver};
use crate::ledger::{AttendanceLedger, LedgerWrite};
use crate::sessions::BeaconSessionManager;

pub struct PresenceIngest {
    sessions: Arc<BeaconSessionManager>,
    ledger: Arc<AttendanceLedger>,
    roster: Arc<dyn RosterResolver>,
    catalog: Arc<dyn EventCatalog>,
}

impl PresenceIngest {
    pub fn new(
        sessions: Arc<BeaconSessionManager>,
        ledger: Arc<AttendanceLedger>,
        roster: Arc<dyn RosterResolver>,
        catalog: Arc<dyn EventCatalog>,
    ) -> Self {
        Self {
            sessions,
            ledger,
            roster,
            catalog,
        }
    }

    pub async fn observe(&self, observation: PresenceObservation) -> Result<IngestOutcome> {
        let event_id = observation.event_id;

        if !self.catalog.exists(event_id).await? {
            return Ok(discard(&observation, DiscardReason::UnknownEvent));
        }

        let Some(session) = self.sessions.active_session(event_id).await? else {
            return Ok(discard(&observation, DiscardReason::NoActiveSession));
        };

        if !session
            .beacon_identifier
            .eq_ignore_ascii_case(observation.beacon_identifier.trim())
        {
            return Ok(discard(&observation, DiscardReason::BeaconMismatch));
        }

        let roster = self.roster.resolve(event_id).await?;
        let Some(student) = roster
            .iter()
            .find(|entry| entry.matches_identifier(&observation.student_identifier))
        else {
            return Ok(discard(&observation, DiscardReason::UnknownStudent));
        };

        let write = LedgerWrite::auto_beacon(
            event_id,
            student.student_id,
            session.session_id,
            observation.observed_at,
        );
        match self.ledger.apply_in_session(write, session.session_id).await? {
            Some(outcome) => Ok(IngestOutcome::Recorded(outcome)),
            // Stopped or superseded after the check above
            None => Ok(discard(&observation, DiscardReason::NoActiveSession)),
        }
    }
}

fn discard(observation: &PresenceObservation, reason: DiscardReason) -> IngestOutcome {
    debug!(
        event_id = observation.event_id,
        beacon = %observation.beacon_identifier,
        student = %observation.student_identifier,
        ?reason,
        "Discarded presence observation"
    );
    IngestOutcome::Discarded(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{fixture, Fixture, BEACON, EVENT, OTHER_BEACON, OUTSIDER, STUDENTS};
    use ensemble_common::attendance::{AttendanceSource, AttendanceStatus, WriteOutcome};
    use ensemble_common::time::now;

    struct Harness {
        sessions: Arc<BeaconSessionManager>,
        ledger: Arc<AttendanceLedger>,
        ingest: PresenceIngest,
    }

    fn harness(f: &Fixture) -> Harness {
        let sessions = Arc::new(BeaconSessionManager::new(
            f.db.clone(),
            f.directory.clone(),
            f.directory.clone(),
        ));
        let ledger = Arc::new(AttendanceLedger::new(
            f.db.clone(),
            f.directory.clone(),
            f.directory.clone(),
        ));
        let ingest = PresenceIngest::new(
            sessions.clone(),
            ledger.clone(),
            f.directory.clone(),
            f.directory.clone(),
        );
        Harness {
            sessions,
            ledger,
            ingest,
        }
    }

    fn seen(student: &str, beacon: &str) -> PresenceObservation {
        PresenceObservation {
            event_id: EVENT,
            student_identifier: student.to_string(),
            beacon_identifier: beacon.to_string(),
            observed_at: now(),
        }
    }

    #[tokio::test]
    async fn test_matching_observation_marks_present() {
        let f = fixture().await;
        let h = harness(&f);
        let session = h.sessions.start(EVENT, BEACON).await.unwrap();

        let outcome = h.ingest.observe(seen("1", BEACON)).await.unwrap();
        let IngestOutcome::Recorded(WriteOutcome::Applied(record)) = outcome else {
            panic!("expected applied write, got {:?}", outcome);
        };
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.source, AttendanceSource::AutoBeacon);
        assert_eq!(record.recorded_by, Some(session.session_id.to_string()));
    }

    #[tokio::test]
    async fn test_student_resolves_by_email_and_beacon_ignores_case() {
        let f = fixture().await;
        let h = harness(&f);
        h.sessions.start(EVENT, BEACON).await.unwrap();

        let outcome = h
            .ingest
            .observe(seen("Ben.Lindqvist@Example.edu", &BEACON.to_lowercase()))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Recorded(WriteOutcome::Applied(_))));

        let record = h.ledger.record(EVENT, STUDENTS[1]).await.unwrap().unwrap();
        assert_eq!(record.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_repeated_observation_is_unchanged() {
        let f = fixture().await;
        let h = harness(&f);
        h.sessions.start(EVENT, BEACON).await.unwrap();

        h.ingest.observe(seen("1", BEACON)).await.unwrap();
        let outcome = h.ingest.observe(seen("1", BEACON)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Recorded(WriteOutcome::Unchanged(_))));
    }

    #[tokio::test]
    async fn test_discards_never_touch_records() {
        let f = fixture().await;
        let h = harness(&f);

        // No session yet
        assert_eq!(
            h.ingest.observe(seen("1", BEACON)).await.unwrap(),
            IngestOutcome::Discarded(DiscardReason::NoActiveSession)
        );

        h.sessions.start(EVENT, BEACON).await.unwrap();
        assert_eq!(
            h.ingest.observe(seen("1", OTHER_BEACON)).await.unwrap(),
            IngestOutcome::Discarded(DiscardReason::BeaconMismatch)
        );
        assert_eq!(
            h.ingest.observe(seen(&OUTSIDER.to_string(), BEACON)).await.unwrap(),
            IngestOutcome::Discarded(DiscardReason::UnknownStudent)
        );
        assert_eq!(
            h.ingest.observe(seen("nobody@example.edu", BEACON)).await.unwrap(),
            IngestOutcome::Discarded(DiscardReason::UnknownStudent)
        );

        let mut foreign = seen("1", BEACON);
        foreign.event_id = 999;
        assert_eq!(
            h.ingest.observe(foreign).await.unwrap(),
            IngestOutcome::Discarded(DiscardReason::UnknownEvent)
        );

        assert!(h.ledger.record(EVENT, STUDENTS[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_observation_after_stop_is_discarded() {
        let f = fixture().await;
        let h = harness(&f);
        h.sessions.start(EVENT, BEACON).await.unwrap();
        h.sessions.stop(EVENT).await.unwrap();

        let outcome = h.ingest.observe(seen("1", BEACON)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded(DiscardReason::NoActiveSession));
    }

    #[tokio::test]
    async fn test_observation_on_pinned_record_is_rejected_not_discarded() {
        let f = fixture().await;
        let h = harness(&f);
        h.sessions.start(EVENT, BEACON).await.unwrap();
        h.ledger
            .apply(LedgerWrite::manual(EVENT, STUDENTS[0], AttendanceStatus::Excused, 3))
            .await
            .unwrap();

        let outcome = h.ingest.observe(seen("1", BEACON)).await.unwrap();
        let IngestOutcome::Recorded(write) = outcome else {
            panic!("expected recorded outcome");
        };
        assert!(write.is_rejected());
        assert_eq!(write.record().status, AttendanceStatus::Excused);
    }
}
