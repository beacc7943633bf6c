//! Docker exec executor.
//!
//! Runs the job inside an already running container through the Docker
//! API, splitting the multiplexed exec stream into stdout and stderr.
//! A timed-out exec is abandoned; stopping the process inside the
//! container is left to the container runtime.

use super::{ExecError, JobOutput, JobSpec, OutputRelay, TrialExecutor};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs jobs with `docker exec` semantics inside a named container.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    docker: Docker,
    container: String,
    relay: Arc<OutputRelay>,
}

impl DockerExecutor {
    /// Connect to the local Docker daemon.
    pub fn new(container: &str, relay: Arc<OutputRelay>) -> Result<Self, ExecError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::with_client(docker, container, relay))
    }

    /// Use an existing Docker client.
    pub fn with_client(docker: Docker, container: &str, relay: Arc<OutputRelay>) -> Self {
        Self {
            docker,
            container: container.to_string(),
            relay,
        }
    }

    async fn run(&self, job: &JobSpec) -> Result<(JobOutput, i64), ExecError> {
        let exec_options = CreateExecOptions {
            cmd: Some(job.argv()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.container, exec_options)
            .await?;

        let mut lines = LineBuffer::default();
        let mut primary = String::new();
        let mut diagnostics = String::new();

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(msg) = output.next().await {
                match msg? {
                    LogOutput::StdOut { message } => {
                        let text = String::from_utf8_lossy(&message);
                        primary.push_str(&text);
                        for line in lines.push(&text) {
                            self.relay.line(&line).await;
                        }
                    }
                    LogOutput::StdErr { message } => {
                        diagnostics.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }
        if let Some(rest) = lines.finish() {
            self.relay.line(&rest).await;
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok((
            JobOutput {
                primary,
                diagnostics,
            },
            exit_code,
        ))
    }
}

#[async_trait]
impl TrialExecutor for DockerExecutor {
    async fn execute(&self, job: &JobSpec) -> Result<JobOutput, ExecError> {
        debug!(container = %self.container, argv = ?job.argv(), "exec in container");

        let Ok(result) = tokio::time::timeout(job.timeout, self.run(job)).await else {
            warn!(container = %self.container, timeout = ?job.timeout, "exec timed out");
            return Err(ExecError::TimedOut(job.timeout));
        };

        let (output, exit_code) = result?;
        if exit_code == 0 {
            Ok(output)
        } else {
            Err(ExecError::NonZeroExit {
                code: exit_code,
                diagnostics: output.diagnostics,
            })
        }
    }
}

/// Reassembles lines from stream frames that may split them anywhere.
#[derive(Debug, Default)]
struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// Append a frame and return every line it completed.
    fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);
        let mut complete = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            complete.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        complete
    }

    /// Any trailing text without a newline.
    fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
