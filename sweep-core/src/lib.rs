//! # sweep-core
//!
//! Pure logic for paramsweep (no I/O, instant tests).
//!
//! This crate implements the pieces of a sweep that can be decided without
//! touching a process, a database or the network:
//! - [`ParameterMatrix`] - cartesian product of named parameter lists
//! - [`MetricsParser`] - flattening of nested job diagnostics
//! - [`CountQuery`] - the dedup predicate (field subset + validity + tolerance)
//! - [`TrialState`] - per-trial state machine
//! - [`SweepSummary`] - per-invocation tally and completion message
//!
//! The actual I/O (running jobs, talking to the store) is performed by
//! `sweep-runner`, which interprets the decisions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dedup;
pub mod matrix;
pub mod metrics;
pub mod state;
pub mod summary;

pub use dedup::{values_match, CountQuery, Validity, DEFAULT_FLOAT_TOLERANCE};
pub use matrix::{Combinations, MatrixError, ParameterMatrix, ParameterSpec};
pub use metrics::{flatten, MetricsError, MetricsParser, DEFAULT_SEPARATOR};
pub use state::{FailureKind, TrialEvent, TrialState};
pub use summary::{AssignmentStatus, HaltReason, SweepSummary};
