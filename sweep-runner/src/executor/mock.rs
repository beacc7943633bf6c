//! Mock executor for testing.
//!
//! Plays back scripted outcomes and captures every job it was asked to run.

use super::{ExecError, JobOutput, JobSpec, TrialExecutor};
use crate::cancel::CancelToken;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A scripted result for one call to `execute`.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with the given diagnostics (JSON text).
    Succeed(String),
    /// Exit with a non-zero code.
    Fail(i64),
    /// Time out.
    TimeOut,
    /// Fire the cancel token (as Ctrl+C would) and never finish.
    Interrupt(CancelToken),
}

/// Mock executor for testing.
#[derive(Debug, Clone)]
pub struct MockExecutor {
    inner: Arc<Mutex<MockExecutorInner>>,
}

#[derive(Debug)]
struct MockExecutorInner {
    jobs: Vec<JobSpec>,
    script: VecDeque<MockOutcome>,
    fallback: String,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    /// Create a mock that succeeds with `{}` diagnostics unless scripted otherwise.
    pub fn new() -> Self {
        Self::succeeding_with("{}")
    }

    /// Create a mock whose unscripted calls succeed with `diagnostics`.
    pub fn succeeding_with(diagnostics: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockExecutorInner {
                jobs: Vec::new(),
                script: VecDeque::new(),
                fallback: diagnostics.to_string(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockExecutorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the outcome of the next unscripted call.
    pub fn push(&self, outcome: MockOutcome) {
        self.lock().script.push_back(outcome);
    }

    /// Every job executed so far, in order.
    pub fn jobs(&self) -> Vec<JobSpec> {
        self.lock().jobs.clone()
    }

    /// Number of jobs executed so far.
    pub fn calls(&self) -> usize {
        self.lock().jobs.len()
    }
}

#[async_trait]
impl TrialExecutor for MockExecutor {
    async fn execute(&self, job: &JobSpec) -> Result<JobOutput, ExecError> {
        let (outcome, fallback) = {
            let mut inner = self.lock();
            inner.jobs.push(job.clone());
            (inner.script.pop_front(), inner.fallback.clone())
        };

        match outcome {
            None => Ok(JobOutput {
                primary: String::new(),
                diagnostics: fallback,
            }),
            Some(MockOutcome::Succeed(diagnostics)) => Ok(JobOutput {
                primary: String::new(),
                diagnostics,
            }),
            Some(MockOutcome::Fail(code)) => Err(ExecError::NonZeroExit {
                code,
                diagnostics: "mock failure".to_string(),
            }),
            Some(MockOutcome::TimeOut) => Err(ExecError::TimedOut(job.timeout)),
            Some(MockOutcome::Interrupt(token)) => {
                token.cancel();
                std::future::pending().await
            }
        }
    }
}
