//! Per-trial state machine.
//!
//! One machine is driven for every (assignment, repeat-index) pair of a
//! pass. It takes events observed by the controller and produces the next
//! state; it performs no I/O itself.
//!
//! ```text
//! Pending ──count ≥ repeat──► Skipped
//!    │
//!    └──count < repeat──► Running ──ok──► Recorded
//!                            └──error──► Failed(kind)
//! ```

use std::fmt;

/// Why a running trial produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Job exceeded its wall-clock bound. The sweep continues.
    TimedOut,
    /// Operator interrupted the job. The sweep halts.
    Cancelled,
    /// Non-zero exit, spawn error or failing pre-trial hook.
    ExecutionFailure,
    /// Diagnostics could not be parsed; handled like an execution failure.
    MalformedMetrics,
    /// The job ran but its record could not be written.
    StoreFailure,
}

impl FailureKind {
    /// True if this failure stops the whole sweep regardless of policy.
    pub fn halts_sweep(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True if the configured failure policy applies to this kind.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::ExecutionFailure | Self::MalformedMetrics)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::ExecutionFailure => "execution failure",
            Self::MalformedMetrics => "malformed metrics",
            Self::StoreFailure => "record not stored",
        };
        f.write_str(s)
    }
}

/// Events fed to a [`TrialState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialEvent {
    /// The store reported `stored` matching records while attempting `repeat`.
    Counted {
        /// Matching records currently stored.
        stored: u64,
        /// Repeat index (1-based) this pass is trying to reach.
        repeat: u64,
    },
    /// The store could not be queried and the policy is fail-closed.
    StoreUnavailable,
    /// The job finished and its record was written.
    Succeeded,
    /// The job did not produce a record.
    Failed(FailureKind),
}

/// Trial lifecycle state - NO I/O, just transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrialState {
    /// Not yet decided.
    #[default]
    Pending,
    /// Already satisfied (or not runnable) for this pass.
    Skipped,
    /// Job is executing.
    Running,
    /// Job succeeded and the record was written.
    Recorded,
    /// Job produced no record.
    Failed(FailureKind),
}

impl TrialState {
    /// Process an event and return the new state.
    ///
    /// Invalid transitions leave the state unchanged.
    pub fn on_event(self, event: TrialEvent) -> Self {
        match (self, event) {
            (Self::Pending, TrialEvent::Counted { stored, repeat }) if stored >= repeat => {
                Self::Skipped
            }
            (Self::Pending, TrialEvent::Counted { .. }) => Self::Running,
            (Self::Pending, TrialEvent::StoreUnavailable) => Self::Skipped,
            (Self::Running, TrialEvent::Succeeded) => Self::Recorded,
            (Self::Running, TrialEvent::Failed(kind)) => Self::Failed(kind),
            (state, _) => state,
        }
    }

    /// True once the trial will not change any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Recorded | Self::Failed(_))
    }

    /// True if the trial actually ran a job.
    pub fn was_executed(&self) -> bool {
        matches!(self, Self::Running | Self::Recorded | Self::Failed(_))
    }
}
