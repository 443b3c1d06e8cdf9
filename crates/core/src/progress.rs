//! Completion percentage of a fanned-out execution.

use crate::execution::BranchSnapshot;

/// Percentage (0–100) of branches that are no longer pending or running.
///
/// Completed, failed and cancelled branches all count as done. Rounds half
/// up, so 1 of 3 is 33 and 2 of 3 is 67. An execution without branches is at
/// 0. Recompute on every snapshot: branch counts can still grow until the
/// execution is sealed.
pub fn progress_percent(branches: &[BranchSnapshot]) -> u8 {
    let total = branches.len();
    if total == 0 {
        return 0;
    }
    let terminal = branches.iter().filter(|b| b.status.is_terminal()).count();
    percent_of(terminal, total)
}

/// `round_half_up(100 * done / total)` in integer arithmetic.
pub fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = done.min(total) as u64;
    let total = total as u64;
    ((200 * done + total) / (2 * total)) as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
