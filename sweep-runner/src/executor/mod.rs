//! Trial execution.
//!
//! A [`JobTemplate`] renders an assignment into a [`JobSpec`]; a
//! [`TrialExecutor`] runs it under its wall-clock bound, relays the
//! primary output stream line by line and captures the diagnostics
//! channel whole.

mod docker;
mod mock;
mod process;

pub use docker::DockerExecutor;
pub use mock::{MockExecutor, MockOutcome};
pub use process::ProcessExecutor;

use crate::config::{ExecutorKind, JobConfig};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sweep_types::{ParamValue, ParameterAssignment};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

/// Errors from running one job.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Job exceeded its wall-clock bound and was abandoned.
    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    /// Operator interrupted the job.
    #[error("job cancelled")]
    Cancelled,

    /// Job exited unsuccessfully.
    #[error("job exited with code {code}")]
    NonZeroExit {
        /// Exit code (-1 if killed by a signal).
        code: i64,
        /// Captured diagnostics output.
        diagnostics: String,
    },

    /// Job could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// I/O error while relaying output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a successful job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    /// Primary output stream (stdout).
    pub primary: String,
    /// Diagnostics channel (stderr), parsed into metrics.
    pub diagnostics: String,
}

/// One external invocation. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Program to run.
    pub program: String,
    /// Full argument list (base args followed by rendered flags).
    pub args: Vec<String>,
    /// Wall-clock bound.
    pub timeout: Duration,
    /// Context parameters: available to hooks and logs, never passed as flags.
    pub context: Vec<(String, ParamValue)>,
}

impl JobSpec {
    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Renders assignments into job specs.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    program: String,
    args: Vec<String>,
    flag_format: String,
    timeout: Duration,
}

impl JobTemplate {
    /// Create a template.
    pub fn new(program: &str, args: Vec<String>, flag_format: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            flag_format: flag_format.to_string(),
            timeout,
        }
    }

    /// Create a template from the `[job]` section.
    pub fn from_config(job: &JobConfig) -> Self {
        Self::new(
            &job.program,
            job.args.clone(),
            &job.flag_format,
            Duration::from_secs(job.timeout_secs),
        )
    }

    /// Wall-clock bound applied to each job and its before-trial hooks.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Render one flag: `ipa_bound` = `1.0` becomes `-Dipa.bound=1.0`.
    pub fn render_flag(&self, name: &str, value: &ParamValue) -> String {
        format!("{}{}={}", self.flag_format, name.replace('_', "."), value)
    }

    /// Build the job for an assignment.
    pub fn render(&self, assignment: &ParameterAssignment) -> JobSpec {
        let mut args = self.args.clone();
        args.extend(assignment.flags().map(|(name, value)| self.render_flag(name, value)));
        JobSpec {
            program: self.program.clone(),
            args,
            timeout: self.timeout,
            context: assignment
                .context()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        }
    }

    /// Build a one-off job with a literal argv appended to the base args.
    pub fn manual(&self, argv: &[String]) -> JobSpec {
        let mut args = self.args.clone();
        args.extend(argv.iter().cloned());
        JobSpec {
            program: self.program.clone(),
            args,
            timeout: self.timeout,
            context: Vec::new(),
        }
    }
}

/// Trait for job execution backends.
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    /// Run one job to completion or until its timeout.
    ///
    /// Dropping the returned future abandons the job; local child
    /// processes are killed.
    async fn execute(&self, job: &JobSpec) -> Result<JobOutput, ExecError>;
}

/// Build the executor selected by the `[job]` section.
pub fn from_config(
    job: &JobConfig,
    relay: Arc<OutputRelay>,
) -> Result<Box<dyn TrialExecutor>, ExecError> {
    match (job.executor, job.container.as_deref()) {
        (ExecutorKind::Docker, Some(container)) => {
            Ok(Box::new(DockerExecutor::new(container, relay)?))
        }
        (ExecutorKind::Docker, None) => Err(ExecError::Spawn {
            program: job.program.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "docker executor needs a container",
            ),
        }),
        (ExecutorKind::Process, _) => Ok(Box::new(ProcessExecutor::new(relay))),
    }
}

/// Relays primary job output to the experiment log and, optionally, the console.
#[derive(Debug, Default)]
pub struct OutputRelay {
    log: Option<Mutex<File>>,
    echo: bool,
}

impl OutputRelay {
    /// Relay that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Relay to the console only.
    pub fn console() -> Self {
        Self {
            log: None,
            echo: true,
        }
    }

    /// Relay to `path`, truncating it first; `echo` also prints each line.
    pub async fn to_file(path: &Path, echo: bool) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            log: Some(Mutex::new(file)),
            echo,
        })
    }

    /// Relay one line of primary output.
    pub async fn line(&self, line: &str) {
        if self.echo {
            println!("{}", line);
        }
        if let Some(log) = &self.log {
            let mut file = log.lock().await;
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(error = %e, "failed to write experiment log");
            }
        }
    }

    /// Write a header line marking the start of a trial.
    pub async fn banner(&self, text: &str) {
        self.line(&format!("# {}", text)).await;
    }

    /// Relay every line of `reader` and return the whole text.
    ///
    /// Lines are split on raw `\n` bytes and decoded lossily, so output
    /// that is not valid UTF-8 is relayed rather than rejected.
    pub(crate) async fn relay_lines<R>(&self, reader: R) -> std::io::Result<String>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut captured = String::new();
        let mut segments = reader.split(b'\n');
        while let Some(segment) = segments.next_segment().await? {
            let text = String::from_utf8_lossy(&segment);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            self.line(line).await;
            captured.push_str(line);
            captured.push('\n');
        }
        Ok(captured)
    }
}
