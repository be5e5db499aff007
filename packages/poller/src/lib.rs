#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scheduled incident poller.
//!
//! One [`Poller`] per dashboard session repeatedly fetches the full
//! incident collection and hands it to the shared [`IncidentStore`].
//!
//! * Cycles never overlap. If a fetch is still pending when the next tick
//!   is due, that tick is skipped rather than queued.
//! * A failed fetch leaves the store untouched; the error is recorded and
//!   the poller waits for its next tick.
//! * Every fetch carries the generation that was current when it was
//!   issued. [`Poller::stop`] bumps the generation, so a result that
//!   arrives after stopping is discarded instead of applied.

pub mod backoff;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use traffic_watch_bus::{Diagnostic, Diagnostics};
use traffic_watch_source::{FetchError, IncidentFetcher};
use traffic_watch_store::{IncidentStore, ReplaceReport};

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedInterval};

/// Poll interval observed in the original dashboard.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest interval [`Poller::start`] accepts; smaller values are raised.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Name used for this component in diagnostics.
const SOURCE: &str = "poller";

/// Lifecycle state of a [`Poller`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Never started.
    #[default]
    Idle,
    /// Scheduling cycles.
    Running,
    /// Stopped; [`Poller::start`] may be called again.
    Stopped,
}

/// Observable poller health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    /// Lifecycle state.
    pub state: PollerState,
    /// Interval passed to the last [`Poller::start`].
    pub interval: Option<Duration>,
    /// Whether a fetch is pending right now.
    pub in_flight: bool,
    /// Fetches issued.
    pub fetches: u64,
    /// Cycles whose result was applied to the store.
    pub cycles_applied: u64,
    /// Fetches that failed.
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Ticks skipped because a fetch was still pending.
    pub skipped_ticks: u64,
    /// Results discarded because the poller was stopped meanwhile.
    pub discarded: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Wall-clock time of the most recent applied cycle.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PollerStatus {
    /// Whether the store is currently showing stale data because the most
    /// recent fetch failed.
    #[must_use]
    pub const fn degraded(&self) -> bool {
        self.consecutive_failures > 0
    }
}

/// Result of one poll cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The fetched collection replaced the store contents.
    Applied(ReplaceReport),
    /// The fetch failed; the store was left as it was.
    Failed(FetchError),
    /// The poller was stopped while the fetch was pending.
    Discarded,
    /// Another fetch was already in flight, so none was issued.
    Skipped,
}

struct Shared {
    store: Arc<IncidentStore>,
    fetcher: Arc<dyn IncidentFetcher>,
    diagnostics: Diagnostics,
    generation: AtomicU64,
    in_flight: AtomicBool,
    status: Mutex<PollerStatus>,
}

impl Shared {
    fn status(&self) -> std::sync::MutexGuard<'_, PollerStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn cycle(&self, generation: u64) -> CycleOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CycleOutcome::Skipped;
        }
        // Held until the store has been replaced and every listener has
        // returned, so the next cycle cannot start mid-notification.
        let _guard = InFlight::claimed(self);
        let result = self.fetcher.fetch().await;

        let current = self.current_generation();
        if generation != current {
            self.status().discarded += 1;
            self.diagnostics.record(Diagnostic::StaleResultDiscarded {
                source: SOURCE.to_string(),
                generation,
                current,
            });
            return CycleOutcome::Discarded;
        }

        match result {
            Ok(records) => {
                let report = self.store.replace_all(records);
                let mut status = self.status();
                if status.consecutive_failures > 0 {
                    log::info!(
                        "Incident feed recovered after {} failed fetch(es)",
                        status.consecutive_failures
                    );
                }
                status.cycles_applied += 1;
                status.consecutive_failures = 0;
                status.last_success_at = Some(Utc::now());
                CycleOutcome::Applied(report)
            }
            Err(e) => {
                if !e.is_transient() {
                    log::error!(
                        "{} returned a non-transient error; will keep retrying: {e}",
                        self.fetcher.name()
                    );
                }
                {
                    let mut status = self.status();
                    status.failures += 1;
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = Some(e.to_string());
                }
                self.diagnostics.record(Diagnostic::NetworkFailure {
                    source: SOURCE.to_string(),
                    message: e.to_string(),
                });
                CycleOutcome::Failed(e)
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        interval: Duration,
        backoff: Arc<dyn BackoffPolicy>,
    ) {
        let mut next_tick = Instant::now();

        loop {
            tokio::time::sleep_until(next_tick).await;
            if self.current_generation() != generation {
                return;
            }

            let started = Instant::now();
            self.cycle(generation).await;

            let failures = self.status().consecutive_failures;
            let delay = backoff.next_delay(interval, failures).max(MIN_INTERVAL);
            next_tick = started + delay;

            let now = Instant::now();
            if next_tick <= now {
                let behind = now.duration_since(next_tick).as_nanos() / delay.as_nanos();
                let missed = u32::try_from(behind + 1).unwrap_or(u32::MAX);
                next_tick += delay.saturating_mul(missed);
                self.status().skipped_ticks += u64::from(missed);
                log::debug!("Fetch outlasted {missed} tick(s); skipping to the next one");
            }
        }
    }
}

/// Marks a fetch as pending until dropped, including when the fetching
/// task is aborted.
struct InFlight<'a>(&'a Shared);

impl<'a> InFlight<'a> {
    fn claimed(shared: &'a Shared) -> Self {
        let mut status = shared.status();
        status.in_flight = true;
        status.fetches += 1;
        drop(status);
        Self(shared)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
        self.0.status().in_flight = false;
    }
}

/// Repeating fetch task for one dashboard session.
pub struct Poller {
    shared: Arc<Shared>,
    backoff: Arc<dyn BackoffPolicy>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("fetcher", &self.shared.fetcher.name())
            .field("backoff", &self.backoff)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates an idle poller that feeds `store` from `fetcher`, waiting a
    /// fixed interval between cycles.
    #[must_use]
    pub fn new(
        store: Arc<IncidentStore>,
        fetcher: Arc<dyn IncidentFetcher>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                fetcher,
                diagnostics,
                generation: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                status: Mutex::new(PollerStatus::default()),
            }),
            backoff: Arc::new(FixedInterval),
            task: Mutex::new(None),
        }
    }

    /// Replaces the delay policy. Takes effect on the next
    /// [`Poller::start`].
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Starts polling: the first fetch is issued immediately, then one per
    /// `interval`. Does nothing if already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio` runtime.
    pub fn start(&self, interval: Duration) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::debug!("Poller already running; start ignored");
            return;
        }

        let interval = interval.max(MIN_INTERVAL);
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut status = self.shared.status();
            status.state = PollerState::Running;
            status.interval = Some(interval);
        }

        log::info!(
            "Polling {} every {interval:?}",
            self.shared.fetcher.name()
        );
        *task = Some(tokio::spawn(
            Arc::clone(&self.shared).run(generation, interval, Arc::clone(&self.backoff)),
        ));
    }

    /// Stops scheduling and invalidates any fetch in flight. Safe to call
    /// in any state.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let mut status = self.shared.status();
        if status.state == PollerState::Running {
            status.state = PollerState::Stopped;
            log::info!("Poller stopped");
        }
    }

    /// Runs one cycle on the caller's task, independent of the schedule.
    ///
    /// Returns [`CycleOutcome::Skipped`] if a scheduled fetch is pending.
    pub async fn poll_once(&self) -> CycleOutcome {
        let generation = self.shared.current_generation();
        self.shared.cycle(generation).await
    }

    /// Whether the schedule is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.status().state == PollerState::Running
    }

    /// Snapshot of the poller's health counters.
    #[must_use]
    pub fn status(&self) -> PollerStatus {
        self.shared.status().clone()
    }

    /// The store this poller feeds.
    #[must_use]
    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.shared.store
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use traffic_watch_incident_models::RawIncident;

    use super::*;

    fn incident(id: u64, kind: &str) -> RawIncident {
        RawIncident::from_value(serde_json::json!({
            "id": id,
            "type": kind,
            "status": "verified",
            "latitude": -1.95,
            "longitude": 30.06,
            "timestamp": "2025-03-01T08:00:00Z",
        }))
    }

    /// Returns scripted responses after an optional delay, tracking how
    /// many fetches overlap.
    #[derive(Debug, Default)]
    struct ScriptedFetcher {
        delay: Duration,
        responses: Mutex<VecDeque<Result<Vec<RawIncident>, FetchError>>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedFetcher {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn push(&self, response: Result<Vec<RawIncident>, FetchError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IncidentFetcher for ScriptedFetcher {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self) -> Result<Vec<RawIncident>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn network_error() -> FetchError {
        FetchError::Status {
            status: 503,
            url: "http://localhost:8000/incidents/".to_string(),
        }
    }

    fn poller(fetcher: &Arc<ScriptedFetcher>) -> (Poller, Arc<IncidentStore>, Diagnostics) {
        let diagnostics = Diagnostics::new();
        let store = Arc::new(IncidentStore::new(diagnostics.clone()));
        let poller = Poller::new(
            Arc::clone(&store),
            Arc::clone(fetcher) as Arc<dyn IncidentFetcher>,
            diagnostics.clone(),
        );
        (poller, store, diagnostics)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_spanning_three_ticks_is_not_overlapped() {
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(350)));
        let (poller, _store, _) = poller(&fetcher);

        poller.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(340)).await;
        assert_eq!(fetcher.calls(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.calls(), 1, "ticks during the slow fetch are skipped");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.calls(), 2, "next aligned tick fires after the fetch");
        assert_eq!(fetcher.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(poller.status().skipped_ticks, 3);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_then_every_interval() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let (poller, store, _) = poller(&fetcher);

        poller.start(DEFAULT_INTERVAL);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(store.revision(), 1);

        tokio::time::sleep(DEFAULT_INTERVAL * 2).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(poller.status().cycles_applied, 3);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_while_running() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let (poller, _store, _) = poller(&fetcher);

        poller.start(Duration::from_secs(1));
        poller.start(Duration::from_secs(1));
        poller.start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(poller.status().interval, Some(Duration::from_secs(1)));
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_keep_last_snapshot_and_keep_polling() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push(Ok(vec![incident(1, "accident"), incident(2, "congestion")]));
        fetcher.push(Err(network_error()));
        fetcher.push(Err(network_error()));
        fetcher.push(Ok(vec![incident(3, "road_blockage")]));
        let (poller, store, diagnostics) = poller(&fetcher);

        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let status = poller.status();
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(store.get().len(), 2, "failed fetches never blank the store");
        assert!(status.degraded());
        assert_eq!(status.consecutive_failures, 2);
        assert!(status.last_error.as_deref().unwrap().contains("503"));
        assert_eq!(diagnostics.counts().network_failures, 2);
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = poller.status();
        assert!(!status.degraded());
        assert_eq!(store.get().len(), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_backoff_stretches_delay_after_failures() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        for _ in 0..4 {
            fetcher.push(Err(network_error()));
        }
        let (poller, _store, _) = poller(&fetcher);
        let poller = poller.with_backoff(Arc::new(ExponentialBackoff::new(Duration::from_secs(8))));

        poller.start(Duration::from_secs(1));
        // Attempts at t=0, 2, 6 (delays 2s, 4s), next at 14.
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(fetcher.calls(), 3);
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(fetcher.calls(), 3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.calls(), 4);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_scheduling() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let (poller, _store, _) = poller(&fetcher);

        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(poller.status().state, PollerState::Stopped);

        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fetcher.calls(), 2);
        assert!(poller.is_running());
        poller.stop();
    }

    #[tokio::test]
    async fn result_arriving_after_stop_is_discarded() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedFetcher::default()
        });
        fetcher.push(Ok(vec![incident(1, "accident")]));
        let (poller, store, diagnostics) = poller(&fetcher);
        let poller = Arc::new(poller);

        let pending = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.poll_once().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        poller.stop();
        gate.notify_one();

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Discarded));
        assert_eq!(store.revision(), 0);
        assert_eq!(poller.status().discarded, 1);
        assert_eq!(diagnostics.counts().stale_results, 1);
    }

    #[tokio::test]
    async fn poll_once_is_skipped_while_a_fetch_is_pending() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedFetcher::default()
        });
        let (poller, _store, _) = poller(&fetcher);
        let poller = Arc::new(poller);

        let first = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.poll_once().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(poller.poll_once().await, CycleOutcome::Skipped));
        gate.notify_one();
        assert!(matches!(first.await.unwrap(), CycleOutcome::Applied(_)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn next_cycle_waits_for_previous_notification() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push(Ok(vec![incident(1, "accident")]));
        fetcher.push(Ok(vec![incident(2, "congestion")]));
        let (poller, store, _) = poller(&fetcher);
        let poller = Arc::new(poller);

        let entered = Arc::new(Notify::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let _subscription = {
            let entered = Arc::clone(&entered);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            store.on_change(move |change| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                if change.snapshot.revision() == 1 {
                    entered.notify_one();
                    std::thread::sleep(Duration::from_millis(300));
                }
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        };

        let first = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.poll_once().await }
        });
        entered.notified().await;

        assert!(matches!(poller.poll_once().await, CycleOutcome::Skipped));
        assert!(matches!(first.await.unwrap(), CycleOutcome::Applied(_)));
        assert_eq!(fetcher.calls(), 1);

        match poller.poll_once().await {
            CycleOutcome::Applied(report) => assert_eq!(report.revision, 2),
            other => panic!("expected second cycle to apply, got {other:?}"),
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }
}
