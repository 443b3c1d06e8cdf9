//! Job, execution and branch snapshots as delivered by the orchestration layer.
//!
//! These are read-only views: the core never mutates or persists them, it
//! only derives status and progress values from whatever snapshot it is
//! handed.

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A named unit of work that can be triggered immediately or on a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: DbId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    pub status: Status,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run of a [`Job`], fanned out into zero or more branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: DbId,
    /// Per-job sequence number, when the orchestration layer assigns one.
    #[serde(default)]
    pub execution_number: Option<i64>,
    pub status: Status,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub branches: Vec<BranchSnapshot>,
}

impl ExecutionSnapshot {
    /// Human-readable label: `#<execution_number>` or the raw id.
    pub fn label(&self) -> String {
        match self.execution_number {
            Some(n) => format!("#{n}"),
            None => format!("execution {}", self.id),
        }
    }

    /// Branches whose status did not parse into a known value.
    pub fn unknown_branch_count(&self) -> usize {
        self.branches
            .iter()
            .filter(|b| b.status == Status::Unknown)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// One target-scoped sub-run of an execution (typically one remote host).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSnapshot {
    pub id: DbId,
    /// Position of the branch within its execution.
    #[serde(default)]
    pub branch_id: Option<i64>,
    pub status: Status,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub result_output: Option<String>,
    #[serde(default)]
    pub result_error: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub target_id: Option<DbId>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
}

impl BranchSnapshot {
    /// Minimal branch with only an id and status. Everything else is unset.
    pub fn new(id: DbId, status: Status) -> Self {
        Self {
            id,
            branch_id: None,
            status,
            started_at: None,
            completed_at: None,
            exit_code: None,
            result_output: None,
            result_error: None,
            target_name: None,
            target_id: None,
            ip_address: None,
            os_type: None,
        }
    }

    /// Exit code, but only once the branch has reached a terminal status.
    pub fn exit_code(&self) -> Option<i32> {
        if self.status.is_terminal() {
            self.exit_code
        } else {
            None
        }
    }

    /// Wall-clock duration, when both timestamps are set and monotonic.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) if completed >= started => Some(completed - started),
            _ => None,
        }
    }

    /// Best display name for the branch target.
    ///
    /// Prefers the target name, then the IP address, then the target id.
    pub fn target_label(&self) -> String {
        if let Some(name) = self.target_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(ip) = self.ip_address.as_deref().filter(|ip| !ip.is_empty()) {
            return ip.to_string();
        }
        match self.target_id {
            Some(id) => format!("target {id}"),
            None => format!("branch {}", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
