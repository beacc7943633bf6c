//! # sweep-runner
//!
//! Drives a parameter sweep to a target repeat count.
//!
//! For every pass `1..=target`, every assignment of the matrix is checked
//! against the result store; assignments with fewer matching records than
//! the pass index are executed once and their diagnostics recorded.
//! Re-running the same sweep therefore resumes where the last one stopped.
//!
//! ## Architecture
//!
//! ```text
//!                ┌───────────────────────────────┐
//!                │        SweepController        │
//!                │  matrix × passes → trials     │
//!                └──┬──────────┬───────────┬─────┘
//!                   │ count    │ execute   │ notify
//!            ┌──────▼────┐ ┌───▼────────┐ ┌▼─────────┐
//!            │ResultStore│ │TrialExecutor│ │ Notifier │
//!            │ (SQLite)  │ │process/docker│ │ (webhook)│
//!            └───────────┘ └────────────┘ └──────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod notify;
pub mod storage;

pub use cancel::CancelToken;
pub use config::{Config, ConfigError};
pub use controller::{build_record, resolve_matrix, SweepController, SweepOptions};
pub use error::{Result, RunnerError, StoreError};
pub use executor::{
    DockerExecutor, ExecError, JobOutput, JobSpec, JobTemplate, MockExecutor, MockOutcome,
    OutputRelay, ProcessExecutor, TrialExecutor,
};
pub use hooks::{HookError, HookSet, TrialHook};
pub use notify::{Notifier, NoopNotifier, NotifyError, RecordingNotifier, WebhookNotifier};
pub use storage::{MemoryStore, ResultStore, SqliteStore};
