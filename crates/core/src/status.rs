//! Lifecycle status shared by jobs, executions and branches.
//!
//! The wire representation is the lower-case name (`"running"`,
//! `"completed"`, ...). Any value we do not recognize deserializes to
//! [`Status::Unknown`] rather than failing the whole snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a job, execution or branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created but not yet started (e.g. waiting on a schedule).
    Scheduled,
    /// Work is in progress.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by a user or the system before finishing.
    Cancelled,
    /// Any status string this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl Status {
    /// Every status that means "no further transitions expected".
    pub const TERMINAL: [Status; 3] = [Status::Completed, Status::Failed, Status::Cancelled];

    /// Parse a wire value. Unrecognized input maps to [`Status::Unknown`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Self::Scheduled,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// `true` for completed, failed and cancelled.
    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
