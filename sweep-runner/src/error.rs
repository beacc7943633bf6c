//! Error types for sweep-runner.

/// Result type for sweep-runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Main error type for sweep-runner operations.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Parameter matrix error.
    #[error("parameter matrix error: {0}")]
    Matrix(#[from] sweep_core::MatrixError),

    /// Metrics parser construction error.
    #[error("metrics configuration error: {0}")]
    Metrics(#[from] sweep_core::MetricsError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The version command failed or produced no usable tag.
    #[error("version tag unavailable: {0}")]
    Version(String),

    /// Job execution error outside a trial (manual runs).
    #[error("execution error: {0}")]
    Exec(#[from] crate::executor::ExecError),

    /// Setup or hook command error.
    #[error("hook error: {0}")]
    Hook(#[from] crate::hooks::HookError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Table or column name cannot be used as an identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
