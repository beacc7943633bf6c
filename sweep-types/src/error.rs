//! Error types for paramsweep value handling.

use thiserror::Error;

/// Errors raised while building assignments and records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    /// Name cannot be used as a store column.
    #[error("invalid identifier: {0:?} (expected [A-Za-z_][A-Za-z0-9_]*)")]
    InvalidIdentifier(String),

    /// The same parameter name was given twice.
    #[error("duplicate parameter: {0}")]
    DuplicateParameter(String),
}
