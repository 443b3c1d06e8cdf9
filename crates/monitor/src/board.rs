//! Live task board: many executions polled side by side.
//!
//! Every tracked execution gets its own [`PollingCoordinator`] and timer, so
//! a slow or failing execution never delays the others. All coordinators
//! publish on one shared [`EventBus`], giving subscribers a single merged
//! stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fanout_core::types::{DbId, Timestamp};
use tokio::sync::broadcast;

use crate::config::PollingConfig;
use crate::coordinator::{PollState, PollingCoordinator};
use crate::events::{EventBus, MonitorEvent, ProgressUpdate};
use crate::fetcher::SnapshotFetcher;

pub struct ExecutionBoard {
    fetcher: Arc<dyn SnapshotFetcher>,
    config: PollingConfig,
    bus: Arc<EventBus>,
    coordinators: Mutex<HashMap<DbId, PollingCoordinator>>,
}

impl ExecutionBoard {
    /// Board using the task-board polling defaults.
    pub fn new(fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        Self::with_config(fetcher, PollingConfig::task_board())
    }

    pub fn with_config(fetcher: Arc<dyn SnapshotFetcher>, config: PollingConfig) -> Self {
        Self {
            fetcher,
            config,
            bus: Arc::new(EventBus::default()),
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    fn coordinators(&self) -> MutexGuard<'_, HashMap<DbId, PollingCoordinator>> {
        self.coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching an execution. Returns `false` if it is already tracked.
    pub fn track(&self, execution_id: DbId) -> bool {
        let mut coordinators = self.coordinators();
        if coordinators.contains_key(&execution_id) {
            return false;
        }
        let coordinator = PollingCoordinator::with_bus(
            Arc::clone(&self.fetcher),
            self.config,
            Arc::clone(&self.bus),
        );
        coordinator.start(execution_id);
        coordinators.insert(execution_id, coordinator);
        true
    }

    /// Stop watching an execution. Returns `false` if it was not tracked.
    pub fn untrack(&self, execution_id: DbId) -> bool {
        match self.coordinators().remove(&execution_id) {
            Some(coordinator) => {
                coordinator.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every tracked execution.
    pub fn cancel_all(&self) {
        for (_, coordinator) in self.coordinators().drain() {
            coordinator.cancel();
        }
    }

    /// Drop coordinators that are no longer polling and return their ids.
    pub fn prune_finished(&self) -> Vec<DbId> {
        let mut coordinators = self.coordinators();
        let mut finished: Vec<DbId> = coordinators
            .iter()
            .filter(|(_, c)| c.state() != PollState::Polling)
            .map(|(id, _)| *id)
            .collect();
        finished.sort_unstable();
        for id in &finished {
            coordinators.remove(id);
        }
        finished
    }

    /// Latest update of every tracked execution, ordered by id.
    pub fn snapshot(&self) -> Vec<ProgressUpdate> {
        let mut updates: Vec<ProgressUpdate> = self
            .coordinators()
            .values()
            .filter_map(PollingCoordinator::latest)
            .collect();
        updates.sort_by_key(|u| u.execution_id);
        updates
    }

    pub fn state(&self, execution_id: DbId) -> Option<PollState> {
        self.coordinators()
            .get(&execution_id)
            .map(PollingCoordinator::state)
    }

    /// Executions whose data has gone stale, ordered by id.
    pub fn stale(&self, now: Timestamp) -> Vec<DbId> {
        let mut ids: Vec<DbId> = self
            .coordinators()
            .iter()
            .filter(|(_, c)| c.is_stale(now))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    pub fn len(&self) -> usize {
        self.coordinators().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fanout_core::Status;

    use super::*;
    use crate::test_helpers::{snapshot, KeyedFetcher};

    fn board() -> ExecutionBoard {
        let fetcher = KeyedFetcher::new([
            (1, snapshot(1, &[Status::Completed, Status::Completed])),
            (2, snapshot(2, &[Status::Running, Status::Completed])),
        ]);
        ExecutionBoard::new(Arc::new(fetcher))
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_each_execution_independently() {
        let board = board();
        let mut rx = board.subscribe();
        assert!(board.track(1));
        assert!(board.track(2));
        assert!(!board.track(1));
        assert_eq!(board.len(), 2);

        let completed = loop {
            if let MonitorEvent::Completed(update) = rx.recv().await.unwrap() {
                break update;
            }
        };
        assert_eq!(completed.execution_id, 1);

        // Give execution 2 a few more ticks; it keeps polling.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(board.state(1), Some(PollState::Completed));
        assert_eq!(board.state(2), Some(PollState::Polling));

        let updates = board.snapshot();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].execution_id, 1);
        assert_eq!(updates[0].progress_percent, 100);
        assert_eq!(updates[1].execution_id, 2);
        assert_eq!(updates[1].status, Status::Running);
        assert_eq!(updates[1].progress_percent, 50);

        board.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn prune_and_untrack() {
        let board = board();
        let mut rx = board.subscribe();
        board.track(1);
        board.track(2);
        while !matches!(rx.recv().await.unwrap(), MonitorEvent::Completed(_)) {}

        assert_eq!(board.prune_finished(), vec![1]);
        assert_eq!(board.len(), 1);
        assert_eq!(board.state(1), None);

        assert!(board.untrack(2));
        assert!(!board.untrack(2));
        assert!(board.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_execution_fails_without_affecting_others() {
        let board = board();
        let mut rx = board.subscribe();
        board.track(99);

        match rx.recv().await.unwrap() {
            MonitorEvent::FetchFailed { execution_id, .. } => assert_eq!(execution_id, 99),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(board.state(99), Some(PollState::Polling));
        assert!(board.stale(chrono::Utc::now()).is_empty());
        assert_eq!(
            board.stale(chrono::Utc::now() + chrono::Duration::seconds(60)),
            vec![99]
        );
        board.cancel_all();
        assert!(board.is_empty());
    }
}
