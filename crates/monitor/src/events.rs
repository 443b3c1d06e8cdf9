//! Monitor events and the in-process bus that fans them out.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel so any number of
//! subscribers (a UI bridge, a logger, a test) independently receive every
//! [`MonitorEvent`]. It is shared via `Arc<EventBus>`; a task board hands the
//! same bus to all of its coordinators to produce one merged stream.

use fanout_core::aggregation::BranchSummary;
use fanout_core::types::{DbId, Timestamp};
use fanout_core::Status;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::FetchError;

// ---------------------------------------------------------------------------
// ProgressUpdate
// ---------------------------------------------------------------------------

/// Derived view of one execution snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub execution_id: DbId,
    /// Aggregated over all branches.
    pub status: Status,
    /// 0–100.
    pub progress_percent: u8,
    pub is_terminal: bool,
    pub branches: BranchSummary,
    /// When the snapshot was processed (UTC).
    pub observed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// MonitorEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Emitted for every successfully processed snapshot.
    Progress(ProgressUpdate),
    /// Emitted exactly once, after the `Progress` event carrying the first
    /// terminal status.
    Completed(ProgressUpdate),
    /// A fetch failed. State is unchanged and the next tick retries.
    FetchFailed {
        execution_id: DbId,
        error: FetchError,
        consecutive_failures: u32,
    },
}

impl MonitorEvent {
    pub fn execution_id(&self) -> DbId {
        match self {
            Self::Progress(update) | Self::Completed(update) => update.execution_id,
            Self::FetchFailed { execution_id, .. } => *execution_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: MonitorEvent) {
        // Only fails when there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
