//! Overall execution status derived from its branches.
//!
//! Every consumer that needs "the" status of a fanned-out execution goes
//! through [`aggregate_status`] so the priority rules live in one place:
//!
//! 1. any branch running  -> `running`
//! 2. else any failed     -> `failed`
//! 3. else all completed  -> `completed`
//! 4. else                -> the execution's own recorded status
//!
//! Cancelled and unknown branches never drive the result on their own; a mix
//! such as "some cancelled, some completed" falls through to rule 4.

use serde::Serialize;

use crate::execution::BranchSnapshot;
use crate::status::Status;

/// Derive the overall status of an execution from its branches.
///
/// `fallback` is the execution's own recorded status, returned when there are
/// no branches yet or when the branch mix has no single correct aggregate.
pub fn aggregate_status(branches: &[BranchSnapshot], fallback: Status) -> Status {
    aggregate_statuses(branches.iter().map(|b| b.status), fallback)
}

/// Same as [`aggregate_status`] for callers holding bare status values.
pub fn aggregate_statuses<I>(statuses: I, fallback: Status) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut any = false;
    let mut any_failed = false;
    let mut all_completed = true;

    for status in statuses {
        any = true;
        match status {
            Status::Running => return Status::Running,
            Status::Failed => {
                any_failed = true;
                all_completed = false;
            }
            Status::Completed => {}
            _ => all_completed = false,
        }
    }

    if !any {
        fallback
    } else if any_failed {
        Status::Failed
    } else if all_completed {
        Status::Completed
    } else {
        fallback
    }
}

// ---------------------------------------------------------------------------
// Summary counts
// ---------------------------------------------------------------------------

/// Per-status branch counts for display ("3 of 5 hosts done").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BranchSummary {
    pub total: usize,
    pub scheduled: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub unknown: usize,
}

impl BranchSummary {
    /// Branches that are no longer pending or running.
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Count branches by status.
pub fn summarize(branches: &[BranchSnapshot]) -> BranchSummary {
    branches
        .iter()
        .fold(BranchSummary::default(), |mut summary, branch| {
            summary.total += 1;
            match branch.status {
                Status::Scheduled => summary.scheduled += 1,
                Status::Running => summary.running += 1,
                Status::Completed => summary.completed += 1,
                Status::Failed => summary.failed += 1,
                Status::Cancelled => summary.cancelled += 1,
                Status::Unknown => summary.unknown += 1,
            }
            summary
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn branches(statuses: &[Status]) -> Vec<BranchSnapshot> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| BranchSnapshot::new(i as i64 + 1, *s))
            .collect()
    }

    // -- priority ladder -----------------------------------------------------

    #[test]
    fn empty_returns_fallback() {
        assert_eq!(aggregate_status(&[], Status::Scheduled), Status::Scheduled);
        assert_eq!(aggregate_status(&[], Status::Cancelled), Status::Cancelled);
    }

    #[test]
    fn any_running_wins() {
        let mixes: &[&[Status]] = &[
            &[Status::Running],
            &[Status::Failed, Status::Running],
            &[Status::Completed, Status::Completed, Status::Running],
            &[Status::Cancelled, Status::Running, Status::Unknown],
            &[Status::Running, Status::Failed, Status::Completed],
        ];
        for mix in mixes {
            assert_eq!(
                aggregate_status(&branches(mix), Status::Completed),
                Status::Running,
                "mix {mix:?}"
            );
        }
    }

    #[test]
    fn failed_beats_partial_success() {
        let mixes: &[&[Status]] = &[
            &[Status::Failed],
            &[Status::Completed, Status::Failed],
            &[Status::Cancelled, Status::Failed, Status::Scheduled],
            &[Status::Unknown, Status::Failed],
        ];
        for mix in mixes {
            assert_eq!(
                aggregate_status(&branches(mix), Status::Running),
                Status::Failed,
                "mix {mix:?}"
            );
        }
    }

    #[test]
    fn all_completed_is_completed() {
        let list = branches(&[Status::Completed; 4]);
        assert_eq!(aggregate_status(&list, Status::Running), Status::Completed);
    }

    #[test]
    fn cancelled_mix_falls_back() {
        let list = branches(&[Status::Completed, Status::Cancelled]);
        assert_eq!(aggregate_status(&list, Status::Running), Status::Running);
        assert_eq!(
            aggregate_status(&list, Status::Cancelled),
            Status::Cancelled
        );
    }

    #[test]
    fn unknown_status_falls_back() {
        let list = branches(&[Status::Completed, Status::Unknown]);
        assert_eq!(aggregate_status(&list, Status::Running), Status::Running);
    }

    #[test]
    fn scheduled_only_falls_back() {
        let list = branches(&[Status::Scheduled, Status::Scheduled]);
        assert_eq!(
            aggregate_status(&list, Status::Scheduled),
            Status::Scheduled
        );
    }

    #[test]
    fn aggregate_bare_statuses() {
        assert_eq!(
            aggregate_statuses([Status::Completed, Status::Failed], Status::Running),
            Status::Failed
        );
        assert_eq!(
            aggregate_statuses(Vec::new(), Status::Scheduled),
            Status::Scheduled
        );
    }

    // -- summarize -----------------------------------------------------------

    #[test]
    fn summarize_counts_each_status() {
        let list = branches(&[
            Status::Scheduled,
            Status::Running,
            Status::Completed,
            Status::Completed,
            Status::Failed,
            Status::Cancelled,
            Status::Unknown,
        ]);
        let summary = summarize(&list);
        assert_eq!(summary.total, 7);
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.unknown, 1);
        assert_eq!(summary.terminal(), 4);
    }

    #[test]
    fn summarize_empty() {
        assert_eq!(summarize(&[]), BranchSummary::default());
    }
}
