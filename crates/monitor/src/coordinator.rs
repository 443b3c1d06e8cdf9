//! Periodic refresh of one execution's state.
//!
//! A [`PollingCoordinator`] owns a single tokio task that fetches a snapshot
//! on every tick, derives the aggregated status and progress, and publishes
//! the result on an [`EventBus`]. State machine:
//!
//! ```text
//! Idle --start--> Polling --terminal status--> Completed
//!   |                |
//!   +----cancel------+-------------------------> Cancelled
//! ```
//!
//! Ticks are processed strictly in order: the next fetch never begins before
//! the previous snapshot has been applied. State lives behind a
//! `std::sync::Mutex` that is never held across an `.await`, so `cancel()`
//! takes effect synchronously: once it returns, no further event is
//! published even if a fetch is still in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use fanout_core::aggregation::{aggregate_status, summarize};
use fanout_core::progress::progress_percent;
use fanout_core::types::{DbId, Timestamp};
use fanout_core::ExecutionSnapshot;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::error::FetchError;
use crate::events::{EventBus, MonitorEvent, ProgressUpdate};
use crate::fetcher::SnapshotFetcher;

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    #[default]
    Idle,
    Polling,
    Completed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tracked {
    phase: PollState,
    execution_id: Option<DbId>,
    started_at: Option<Timestamp>,
    last_success_at: Option<Timestamp>,
    latest: Option<ProgressUpdate>,
    consecutive_failures: u32,
}

struct Shared {
    state: Mutex<Tracked>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Derive status/progress from a snapshot and publish it.
    fn apply_snapshot(&self, execution_id: DbId, snapshot: &ExecutionSnapshot) -> Flow {
        let unknown = snapshot.unknown_branch_count();
        if unknown > 0 {
            tracing::warn!(
                execution_id,
                unknown,
                "Snapshot contains branches with an unrecognized status",
            );
        }

        let status = aggregate_status(&snapshot.branches, snapshot.status);
        let update = ProgressUpdate {
            execution_id,
            status,
            progress_percent: progress_percent(&snapshot.branches),
            is_terminal: status.is_terminal(),
            branches: summarize(&snapshot.branches),
            observed_at: Utc::now(),
        };

        let mut state = lock(&self.state);
        if state.phase != PollState::Polling {
            return Flow::Stop;
        }
        state.last_success_at = Some(update.observed_at);
        state.consecutive_failures = 0;
        state.latest = Some(update.clone());

        tracing::debug!(
            execution_id,
            status = %update.status,
            progress = update.progress_percent,
            "Execution snapshot applied",
        );
        self.bus.publish(MonitorEvent::Progress(update.clone()));

        if update.is_terminal {
            state.phase = PollState::Completed;
            tracing::info!(
                execution_id,
                status = %update.status,
                "Execution reached terminal status",
            );
            self.bus.publish(MonitorEvent::Completed(update));
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// Record a failed fetch. Never changes the phase.
    fn record_failure(&self, execution_id: DbId, error: FetchError) -> Flow {
        let mut state = lock(&self.state);
        if state.phase != PollState::Polling {
            return Flow::Stop;
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let consecutive_failures = state.consecutive_failures;

        tracing::warn!(
            execution_id,
            consecutive_failures,
            error = %error,
            "Snapshot fetch failed",
        );
        self.bus.publish(MonitorEvent::FetchFailed {
            execution_id,
            error,
            consecutive_failures,
        });
        Flow::Continue
    }
}

// ---------------------------------------------------------------------------
// PollingCoordinator
// ---------------------------------------------------------------------------

/// Watches one execution until it reaches a terminal status or is cancelled.
pub struct PollingCoordinator {
    fetcher: Arc<dyn SnapshotFetcher>,
    config: PollingConfig,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingCoordinator {
    /// Coordinator with its own event bus.
    pub fn new(fetcher: Arc<dyn SnapshotFetcher>, config: PollingConfig) -> Self {
        Self::with_bus(fetcher, config, Arc::new(EventBus::default()))
    }

    /// Coordinator publishing on a shared bus.
    pub fn with_bus(
        fetcher: Arc<dyn SnapshotFetcher>,
        config: PollingConfig,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            fetcher,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(Tracked::default()),
                bus,
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Begin polling `execution_id` on the current tokio runtime.
    ///
    /// Only valid from [`PollState::Idle`]; from any other state, or when
    /// called outside a runtime, this is a no-op returning `false`.
    pub fn start(&self, execution_id: DbId) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(execution_id, "Cannot start polling outside a tokio runtime");
            return false;
        };

        let mut state = lock(&self.shared.state);
        if state.phase != PollState::Idle {
            tracing::debug!(
                execution_id,
                phase = ?state.phase,
                "Ignoring start on a coordinator that is not idle",
            );
            return false;
        }
        state.phase = PollState::Polling;
        state.execution_id = Some(execution_id);
        state.started_at = Some(Utc::now());

        tracing::info!(
            execution_id,
            interval_ms = self.config.interval.as_millis() as u64,
            "Polling execution",
        );

        let handle = runtime.spawn(poll_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.fetcher),
            self.config,
            execution_id,
        ));
        *lock(&self.task) = Some(handle);
        true
    }

    /// Stop polling. Idempotent: returns `false` when already stopped.
    ///
    /// No event is published after this returns.
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if matches!(state.phase, PollState::Completed | PollState::Cancelled) {
            return false;
        }
        state.phase = PollState::Cancelled;
        self.shared.cancel.cancel();
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        tracing::info!(execution_id = ?state.execution_id, "Polling cancelled");
        true
    }

    pub fn state(&self) -> PollState {
        lock(&self.shared.state).phase
    }

    pub fn execution_id(&self) -> Option<DbId> {
        lock(&self.shared.state).execution_id
    }

    /// Most recent successfully derived update.
    pub fn latest(&self) -> Option<ProgressUpdate> {
        lock(&self.shared.state).latest.clone()
    }

    /// When a snapshot was last fetched and applied successfully.
    pub fn last_successful_update(&self) -> Option<Timestamp> {
        lock(&self.shared.state).last_success_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        lock(&self.shared.state).consecutive_failures
    }

    /// Whether a polling coordinator has gone `stale_after` without a
    /// successful update (counting from `start` if none succeeded yet).
    pub fn is_stale(&self, now: Timestamp) -> bool {
        let state = lock(&self.shared.state);
        if state.phase != PollState::Polling {
            return false;
        }
        let Some(since) = state.last_success_at.or(state.started_at) else {
            return false;
        };
        (now - since)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.config.stale_after)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.bus.subscribe()
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = task {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Refresh loop
// ---------------------------------------------------------------------------

async fn poll_loop(
    shared: Arc<Shared>,
    fetcher: Arc<dyn SnapshotFetcher>,
    config: PollingConfig,
    execution_id: DbId,
) {
    let mut interval = tokio::time::interval(config.interval.max(MIN_INTERVAL));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Cancellation is always checked first so no fetch begins once
        // cancel() has returned.
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            result = tokio::time::timeout(config.fetch_timeout, fetcher.fetch(execution_id)) => result,
        };

        let flow = match fetched {
            Ok(Ok(snapshot)) => shared.apply_snapshot(execution_id, &snapshot),
            Ok(Err(error)) => shared.record_failure(execution_id, error),
            Err(_) => shared.record_failure(
                execution_id,
                FetchError::Timeout {
                    elapsed_ms: config.fetch_timeout.as_millis() as u64,
                },
            ),
        };
        if flow == Flow::Stop {
            break;
        }
    }

    tracing::debug!(execution_id, "Polling loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use fanout_core::Status;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::test_helpers::{snapshot, ScriptedFetcher, SlowFetcher};

    fn coordinator(fetcher: Arc<dyn SnapshotFetcher>) -> PollingCoordinator {
        PollingCoordinator::new(fetcher, PollingConfig::execution())
    }

    // -- completion ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn completes_exactly_once_and_stops_ticking() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(snapshot(1, &[Status::Running, Status::Scheduled, Status::Scheduled])),
            Ok(snapshot(1, &[Status::Completed, Status::Running, Status::Scheduled])),
            Ok(snapshot(1, &[Status::Completed, Status::Completed, Status::Running])),
            Ok(snapshot(1, &[Status::Completed, Status::Completed, Status::Completed])),
        ]));
        let coordinator = coordinator(fetcher.clone());
        let mut rx = coordinator.subscribe();
        assert!(coordinator.start(1));

        let mut progress = Vec::new();
        let completed = loop {
            match rx.recv().await.unwrap() {
                MonitorEvent::Progress(update) => progress.push(update.progress_percent),
                MonitorEvent::Completed(update) => break update,
                other => panic!("unexpected event {other:?}"),
            }
        };
        assert_eq!(progress, vec![0, 33, 67, 100]);
        assert_eq!(completed.status, Status::Completed);
        assert!(completed.is_terminal);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls(), 4);
        assert_eq!(coordinator.state(), PollState::Completed);
        assert_matches!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_branch_is_terminal() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok(snapshot(
            2,
            &[Status::Failed, Status::Completed],
        ))]));
        let coordinator = coordinator(fetcher);
        let mut rx = coordinator.subscribe();
        coordinator.start(2);

        assert_matches!(rx.recv().await.unwrap(), MonitorEvent::Progress(_));
        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::Completed(ProgressUpdate { status: Status::Failed, .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn execution_without_branches_uses_recorded_status() {
        let mut cancelled = snapshot(3, &[]);
        cancelled.status = Status::Cancelled;
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Ok(snapshot(3, &[])),
            Ok(cancelled),
        ]));
        let coordinator = coordinator(fetcher);
        let mut rx = coordinator.subscribe();
        coordinator.start(3);

        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::Progress(ProgressUpdate { status: Status::Running, progress_percent: 0, .. })
        );
        assert_matches!(rx.recv().await.unwrap(), MonitorEvent::Progress(_));
        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::Completed(ProgressUpdate { status: Status::Cancelled, .. })
        );
    }

    // -- cancellation --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(4, &[Status::Running])));
        let coordinator = coordinator(fetcher.clone());
        assert!(coordinator.start(4));

        assert!(coordinator.cancel());
        assert!(!coordinator.cancel());
        assert_eq!(coordinator.state(), PollState::Cancelled);

        let calls = fetcher.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_polling_stops_events() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(5, &[Status::Running])));
        let coordinator = coordinator(fetcher.clone());
        let mut rx = coordinator.subscribe();
        coordinator.start(5);

        assert_matches!(rx.recv().await.unwrap(), MonitorEvent::Progress(_));
        assert_matches!(rx.recv().await.unwrap(), MonitorEvent::Progress(_));
        assert!(coordinator.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_matches!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_in_flight_fetch() {
        let fetcher = Arc::new(SlowFetcher::new(Duration::from_secs(2)));
        let coordinator = PollingCoordinator::new(
            fetcher,
            PollingConfig::execution().with_fetch_timeout(Duration::from_secs(10)),
        );
        let mut rx = coordinator.subscribe();
        coordinator.start(6);

        // Let the first fetch begin, then cancel before it resolves.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(coordinator.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_matches!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(coordinator.latest().is_none());
    }

    #[tokio::test]
    async fn cancel_from_idle_blocks_start() {
        let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));
        let coordinator = coordinator(fetcher);
        assert!(coordinator.cancel());
        assert!(!coordinator.start(7));
        assert_eq!(coordinator.state(), PollState::Cancelled);
    }

    #[test]
    fn start_outside_runtime_stays_idle() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(15, &[Status::Running])));
        let coordinator = coordinator(fetcher.clone());
        assert!(!coordinator.start(15));
        assert_eq!(coordinator.state(), PollState::Idle);
        assert_eq!(coordinator.execution_id(), None);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_right_after_start_never_fetches() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(16, &[Status::Running])));
        let coordinator = coordinator(fetcher.clone());
        let mut rx = coordinator.subscribe();
        assert!(coordinator.start(16));
        assert!(coordinator.cancel());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls(), 0);
        assert_matches!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_no_op() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(8, &[Status::Running])));
        let coordinator = coordinator(fetcher);
        assert!(coordinator.start(8));
        assert!(!coordinator.start(9));
        assert_eq!(coordinator.execution_id(), Some(8));
        coordinator.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_polling() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(10, &[Status::Running])));
        {
            let coordinator = coordinator(fetcher.clone());
            let mut rx = coordinator.subscribe();
            coordinator.start(10);
            rx.recv().await.unwrap();
        }
        let calls = fetcher.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls(), calls);
    }

    // -- fetch failures ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_does_not_change_state() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Err(FetchError::Transport("connection refused".into())),
            Err(FetchError::Status { status: 502 }),
            Ok(snapshot(11, &[Status::Running, Status::Completed])),
        ]));
        let coordinator = coordinator(fetcher);
        let mut rx = coordinator.subscribe();
        coordinator.start(11);

        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::FetchFailed { consecutive_failures: 1, .. }
        );
        assert_eq!(coordinator.state(), PollState::Polling);
        assert!(coordinator.last_successful_update().is_none());
        assert!(coordinator.latest().is_none());

        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::FetchFailed { consecutive_failures: 2, error: FetchError::Status { status: 502 }, .. }
        );
        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::Progress(ProgressUpdate { progress_percent: 50, .. })
        );
        assert_eq!(coordinator.state(), PollState::Polling);
        assert_eq!(coordinator.consecutive_failures(), 0);
        assert!(coordinator.last_successful_update().is_some());
        coordinator.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let fetcher = Arc::new(SlowFetcher::new(Duration::from_secs(60)));
        let coordinator = PollingCoordinator::new(
            fetcher,
            PollingConfig::execution().with_fetch_timeout(Duration::from_secs(2)),
        );
        let mut rx = coordinator.subscribe();
        coordinator.start(12);

        assert_matches!(
            rx.recv().await.unwrap(),
            MonitorEvent::FetchFailed { error: FetchError::Timeout { elapsed_ms: 2000 }, .. }
        );
        assert_eq!(coordinator.state(), PollState::Polling);
        coordinator.cancel();
    }

    // -- staleness -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn stale_without_successful_updates() {
        let fetcher = Arc::new(ScriptedFetcher::new(Vec::new()));
        let coordinator = PollingCoordinator::new(
            fetcher,
            PollingConfig::execution().with_stale_after(Duration::from_secs(10)),
        );
        let mut rx = coordinator.subscribe();
        coordinator.start(13);
        assert_matches!(rx.recv().await.unwrap(), MonitorEvent::FetchFailed { .. });

        assert!(!coordinator.is_stale(Utc::now()));
        assert!(coordinator.is_stale(Utc::now() + chrono::Duration::seconds(11)));
        coordinator.cancel();
        assert!(!coordinator.is_stale(Utc::now() + chrono::Duration::seconds(11)));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_after_successful_update() {
        let fetcher = Arc::new(ScriptedFetcher::repeating(snapshot(14, &[Status::Running])));
        let coordinator = coordinator(fetcher);
        let mut rx = coordinator.subscribe();
        coordinator.start(14);
        rx.recv().await.unwrap();

        let last = coordinator.last_successful_update().unwrap();
        assert!(!coordinator.is_stale(last + chrono::Duration::seconds(5)));
        assert!(coordinator.is_stale(last + chrono::Duration::seconds(31)));
        coordinator.cancel();
    }
}
