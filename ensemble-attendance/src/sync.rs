//! Live view synchronizer
//!
//! Pull-based refresh of an event's attendance sheet. A single background
//! task reads the ledger on a fixed interval and publishes the result
//! through a `watch` channel, replacing the view wholesale. Reads never
//! overlap: the next tick is awaited only after the previous read resolves,
//! and missed ticks are delayed rather than burst.
//!
//! A failed read is logged and counted; the last good sheet stays visible
//! and polling continues on the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ensemble_common::attendance::{AttendanceSheet, EventId};
use ensemble_common::time::now;
use ensemble_common::{Error, Result};
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::settings::LiveViewSettings;
use crate::ledger::AttendanceLedger;

/// Polling interval used when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Lower bound on the polling interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the synchronizer reads attendance from
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn read(&self, event_id: EventId) -> Result<AttendanceSheet>;
}

#[async_trait]
impl LedgerSource for AttendanceLedger {
    async fn read(&self, event_id: EventId) -> Result<AttendanceSheet> {
        AttendanceLedger::read(self, event_id).await
    }
}

/// Reads the sheet from a running attendance service
pub struct HttpLedgerSource {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpLedgerSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Polling interval configured on the service
    pub async fn poll_interval(&self) -> Result<Duration> {
        let url = format!("{}/api/settings/live-view", self.base_url);
        let settings: LiveViewSettings = self
            .http_client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Transient(format!("GET {}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| Error::Transient(format!("GET {}: invalid settings body: {}", url, e)))?;

        Ok(Duration::from_millis(settings.poll_interval_ms))
    }
}

#[async_trait]
impl LedgerSource for HttpLedgerSource {
    async fn read(&self, event_id: EventId) -> Result<AttendanceSheet> {
        let url = format!("{}/api/events/{}/attendance", self.base_url, event_id);
        debug!(url = %url, "Polling attendance");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            return Err(if status == reqwest::StatusCode::NOT_FOUND {
                Error::NotFound(message)
            } else {
                Error::Transient(format!("GET {} returned {}: {}", url, status, message))
            });
        }

        response
            .json::<AttendanceSheet>()
            .await
            .map_err(|e| Error::Transient(format!("GET {}: invalid attendance body: {}", url, e)))
    }
}

/// Latest state seen by a live view
#[derive(Debug, Clone, Default)]
pub struct LiveView {
    /// Last successfully read sheet, kept across failed polls
    pub sheet: Option<AttendanceSheet>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Capability handed to a view: begin and end polling
#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Start polling, replacing any running loop
    async fn start(&self, interval: Duration);

    /// Stop polling; no-op when not running
    async fn stop(&self);
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LiveViewSynchronizer {
    event_id: EventId,
    source: Arc<dyn LedgerSource>,
    view: Arc<watch::Sender<LiveView>>,
    task: Mutex<Option<PollTask>>,
}

impl LiveViewSynchronizer {
    pub fn new(event_id: EventId, source: Arc<dyn LedgerSource>) -> Self {
        let (view, _) = watch::channel(LiveView::default());
        Self {
            event_id,
            source,
            view: Arc::new(view),
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveView> {
        self.view.subscribe()
    }

    pub fn current(&self) -> LiveView {
        self.view.borrow().clone()
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

#[async_trait]
impl Synchronizer for LiveViewSynchronizer {
    async fn start(&self, interval: Duration) {
        let period = interval.max(MIN_POLL_INTERVAL);
        let mut slot = self.task.lock().await;

        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
            if let Err(e) = previous.handle.await {
                warn!(event_id = self.event_id, "Live view poll task ended abnormally: {}", e);
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.event_id,
            self.source.clone(),
            self.view.clone(),
            period,
            cancel.clone(),
        ));

        info!(event_id = self.event_id, interval_ms = period.as_millis() as u64, "Live view polling started");
        *slot = Some(PollTask { cancel, handle });
    }

    async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(event_id = self.event_id, "Live view poll task ended abnormally: {}", e);
        }
        info!(event_id = self.event_id, "Live view polling stopped");
    }
}

impl Drop for LiveViewSynchronizer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn poll_loop(
    event_id: EventId,
    source: Arc<dyn LedgerSource>,
    view: Arc<watch::Sender<LiveView>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.read(event_id) => result,
        };

        match result {
            Ok(sheet) => view.send_modify(|v| {
                v.sheet = Some(sheet);
                v.refreshed_at = Some(now());
                v.consecutive_failures = 0;
                v.last_error = None;
            }),
            Err(e) => {
                warn!(event_id, error = %e, "Attendance poll failed, keeping last view");
                view.send_modify(|v| {
                    v.consecutive_failures += 1;
                    v.last_error = Some(e.to_string());
                });
            }
        }
    }

    debug!(event_id, "Live view poll loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted source: optional delay per read, fails the first `failures` reads
    struct FakeSource {
        delay: Duration,
        failures: u32,
        calls: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl FakeSource {
        fn new(delay: Duration, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                delay,
                failures,
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LedgerSource for FakeSource {
        async fn read(&self, event_id: EventId) -> Result<AttendanceSheet> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call <= self.failures {
                Err(Error::Transient("database locked".to_string()))
            } else {
                Ok(AttendanceSheet::new(event_id, Vec::new(), now()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_is_immediate() {
        let source = FakeSource::new(Duration::ZERO, 0);
        let sync = LiveViewSynchronizer::new(7, source.clone());

        sync.start(DEFAULT_POLL_INTERVAL).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let view = sync.current();
        assert_eq!(view.sheet.map(|s| s.event_id), Some(7));
        assert!(view.refreshed_at.is_some());
        assert_eq!(source.calls(), 1);
        assert!(sync.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reads_never_overlap() {
        let source = FakeSource::new(Duration::from_millis(350), 0);
        let sync = LiveViewSynchronizer::new(7, source.clone());

        sync.start(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        sync.stop().await;

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(source.calls() >= 3);
        assert!(source.calls() <= 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_continues_after_failures() {
        let source = FakeSource::new(Duration::ZERO, 2);
        let sync = LiveViewSynchronizer::new(7, source.clone());
        let mut rx = sync.subscribe();

        sync.start(Duration::from_millis(100)).await;

        rx.changed().await.unwrap();
        let after_first = rx.borrow_and_update().clone();
        assert_eq!(after_first.consecutive_failures, 1);
        assert!(after_first.sheet.is_none());
        assert!(after_first.last_error.is_some());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let view = sync.current();
        assert!(view.sheet.is_some());
        assert_eq!(view.consecutive_failures, 0);
        assert!(view.last_error.is_none());
        assert!(source.calls() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_good_sheet() {
        struct FlakySource {
            calls: AtomicU32,
        }

        #[async_trait]
        impl LedgerSource for FlakySource {
            async fn read(&self, event_id: EventId) -> Result<AttendanceSheet> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(AttendanceSheet::new(event_id, Vec::new(), now()))
                } else {
                    Err(Error::Transient("connection refused".to_string()))
                }
            }
        }

        let sync = LiveViewSynchronizer::new(3, Arc::new(FlakySource { calls: AtomicU32::new(0) }));
        sync.start(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(350)).await;

        let view = sync.current();
        assert!(view.sheet.is_some());
        assert!(view.consecutive_failures >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let source = FakeSource::new(Duration::ZERO, 0);
        let sync = LiveViewSynchronizer::new(7, source.clone());

        sync.start(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        sync.stop().await;
        let calls = source.calls();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), calls);
        assert!(!sync.is_running().await);

        // Stopping again is a no-op
        sync.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_loop() {
        let source = FakeSource::new(Duration::ZERO, 0);
        let sync = LiveViewSynchronizer::new(7, source.clone());

        sync.start(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        sync.start(Duration::from_secs(1)).await;
        let calls = source.calls();

        // Only the slow loop remains: one immediate read, nothing more within the second
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(source.calls(), calls + 1);
        sync.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_and_closes_channel() {
        let source = FakeSource::new(Duration::ZERO, 0);
        let sync = LiveViewSynchronizer::new(7, source.clone());
        let mut rx = sync.subscribe();

        sync.start(Duration::from_millis(100)).await;
        rx.changed().await.unwrap();
        drop(sync);

        loop {
            if rx.changed().await.is_err() {
                break;
            }
        }
        let calls = source.calls();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), calls);
    }

    /// Panics on its first read, then serves empty sheets
    struct PanicOnceSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LedgerSource for PanicOnceSource {
        async fn read(&self, event_id: EventId) -> Result<AttendanceSheet> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("source blew up");
            }
            Ok(AttendanceSheet::new(event_id, Vec::new(), now()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_crashed_loop_polls_again() {
        let source = Arc::new(PanicOnceSource { calls: AtomicU32::new(0) });
        let sync = LiveViewSynchronizer::new(7, source.clone());

        sync.start(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sync.is_running().await);
        assert!(sync.current().sheet.is_none());

        sync.start(Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sync.is_running().await);
        assert_eq!(sync.current().sheet.map(|s| s.event_id), Some(7));
        sync.stop().await;
    }
}
