//! Polling boundary for fanned-out job executions.
//!
//! - [`PollingCoordinator`] watches one execution on its own timer and
//!   publishes derived status/progress until the execution is terminal.
//! - [`ExecutionBoard`] runs one coordinator per execution for a live board.
//! - [`SnapshotFetcher`] is the transport seam; [`HttpSnapshotFetcher`]
//!   implements it against the REST API.
//! - [`MonitorConfig`] loads polling intervals and the API URL from the
//!   environment.

pub mod board;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fetcher;

pub use board::ExecutionBoard;
pub use config::{MonitorConfig, PollingConfig};
pub use coordinator::{PollState, PollingCoordinator};
pub use error::{FetchError, MonitorError};
pub use events::{EventBus, MonitorEvent, ProgressUpdate};
pub use fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
