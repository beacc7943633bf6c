//! # sweep-types
//!
//! Shared types for the paramsweep experiment runner.
//!
//! This crate provides the foundational types used across all paramsweep crates:
//! - [`ParamValue`] - Closed scalar variant for parameter and record values
//! - [`ParameterAssignment`], [`ParamRole`] - One concrete point of a parameter matrix
//! - [`ResultRecord`] - A persisted trial result (assignment + metrics + metadata)
//! - [`TypeError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod assignment;
mod error;
mod record;
mod value;

pub use assignment::{is_valid_identifier, ParamRole, ParameterAssignment};
pub use error::TypeError;
pub use record::{ResultRecord, RECORDED_AT_FIELD, SWEEP_ID_FIELD};
pub use value::ParamValue;
