//! Pure domain logic for tracking fanned-out job executions.
//!
//! - [`aggregation`] derives one overall status from many branch statuses.
//! - [`progress`] turns branch states into a completion percentage.
//! - [`schedule`] validates schedule definitions and resolves next fire times.
//!
//! Nothing in this crate performs I/O or keeps state between calls, so every
//! function is safe to call concurrently from any number of callers.

pub mod aggregation;
pub mod error;
pub mod execution;
pub mod progress;
pub mod schedule;
pub mod status;
pub mod types;

pub use aggregation::{aggregate_status, summarize, BranchSummary};
pub use error::CoreError;
pub use execution::{BranchSnapshot, ExecutionSnapshot, Job};
pub use progress::progress_percent;
pub use schedule::{next_fire_time, validate, ScheduleConfig};
pub use status::Status;
