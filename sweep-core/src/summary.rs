//! Per-invocation tally and the completion message sent when a sweep ends.

use std::fmt;
use sweep_types::ParameterAssignment;

use crate::state::{FailureKind, TrialState};

/// Why a sweep stopped before covering the whole matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Operator interrupt during a trial.
    Cancelled,
    /// A trial failed and the failure policy is `abort`.
    FailurePolicy,
    /// The failure budget was exhausted.
    FailureBudget,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cancelled => "cancelled by operator",
            Self::FailurePolicy => "aborted on trial failure",
            Self::FailureBudget => "failure budget exhausted",
        };
        f.write_str(s)
    }
}

/// Current versus target count for one assignment (dry-run report row).
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentStatus {
    /// The assignment.
    pub assignment: ParameterAssignment,
    /// Matching records currently stored.
    pub stored: u64,
    /// Target repeat count.
    pub target: u64,
}

impl AssignmentStatus {
    /// Trials still needed to reach the target.
    pub fn remaining(&self) -> u64 {
        self.target.saturating_sub(self.stored)
    }
}

/// Tally of one sweep invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    /// Trials that actually ran a job this invocation.
    pub executed: u64,
    /// Trials whose record was written.
    pub recorded: u64,
    /// Trials skipped because the target was already met (or fail-closed).
    pub skipped: u64,
    /// Trials that produced no record, by kind.
    pub timed_out: u64,
    /// Trials cancelled by the operator.
    pub cancelled: u64,
    /// Non-zero exits, spawn errors, failing hooks, malformed diagnostics.
    pub execution_failures: u64,
    /// Store queries or inserts that failed. A failed insert is not
    /// counted as a failed trial.
    pub store_errors: u64,
    /// Set when the sweep stopped early.
    pub halted: Option<HaltReason>,
    /// Dry-run rows (empty for a real sweep).
    pub statuses: Vec<AssignmentStatus>,
}

impl SweepSummary {
    /// Fold one terminal trial state into the tally.
    pub fn observe(&mut self, state: TrialState) {
        if state.was_executed() {
            self.executed += 1;
        }
        match state {
            TrialState::Skipped => self.skipped += 1,
            TrialState::Recorded => self.recorded += 1,
            TrialState::Failed(FailureKind::TimedOut) => self.timed_out += 1,
            TrialState::Failed(FailureKind::Cancelled) => self.cancelled += 1,
            TrialState::Failed(FailureKind::StoreFailure) => self.store_errors += 1,
            TrialState::Failed(_) => self.execution_failures += 1,
            TrialState::Pending | TrialState::Running => {}
        }
    }

    /// Total failed trials of every kind.
    pub fn failed(&self) -> u64 {
        self.timed_out + self.cancelled + self.execution_failures
    }

    /// One-line completion message for the operator notification.
    pub fn message(&self) -> String {
        let mut text = format!(
            "Finished {} experiments ({} recorded, {} failed, {} skipped).",
            self.executed,
            self.recorded,
            self.failed(),
            self.skipped
        );
        if self.store_errors > 0 {
            text.push_str(&format!(" {} store errors.", self.store_errors));
        }
        if let Some(reason) = self.halted {
            text.push_str(&format!(" Halted: {}.", reason));
        }
        text
    }
}
