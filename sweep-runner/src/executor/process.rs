//! Local child-process executor.
//!
//! The job is spawned from its argv (never through a shell). Remote
//! workloads are reached the same way, with `ssh` or `docker` as the
//! program.

use super::{ExecError, JobOutput, JobSpec, OutputRelay, TrialExecutor};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs jobs as local child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    relay: Arc<OutputRelay>,
}

impl ProcessExecutor {
    /// Create an executor relaying primary output through `relay`.
    pub fn new(relay: Arc<OutputRelay>) -> Self {
        Self { relay }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Arc::new(OutputRelay::disabled()))
    }
}

#[async_trait]
impl TrialExecutor for ProcessExecutor {
    async fn execute(&self, job: &JobSpec) -> Result<JobOutput, ExecError> {
        debug!(program = %job.program, args = ?job.args, "spawning job");

        let mut child = Command::new(&job.program)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn {
                program: job.program.clone(),
                source: e,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let relay = async move {
                match stdout {
                    Some(stdout) => self.relay.relay_lines(BufReader::new(stdout)).await,
                    None => Ok(String::new()),
                }
            };
            let capture = async move {
                let mut buf = Vec::new();
                if let Some(mut stderr) = stderr {
                    stderr.read_to_end(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
            };
            let (primary, diagnostics) = tokio::try_join!(relay, capture)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((primary, diagnostics, status))
        };

        let outcome = tokio::time::timeout(job.timeout, run).await;
        let Ok(finished) = outcome else {
            warn!(program = %job.program, timeout = ?job.timeout, "job timed out, killing");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "kill after timeout failed");
            }
            return Err(ExecError::TimedOut(job.timeout));
        };

        let (primary, diagnostics, status) = finished?;
        if status.success() {
            Ok(JobOutput {
                primary,
                diagnostics,
            })
        } else {
            Err(ExecError::NonZeroExit {
                code: status.code().map(i64::from).unwrap_or(-1),
                diagnostics,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str, timeout: Duration) -> JobSpec {
        JobSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout,
            context: Vec::new(),
        }
    }

    #[tokio::test]
    async fn separates_primary_and_diagnostics() {
        let exec = ProcessExecutor::default();
        let out = exec
            .execute(&sh(
                r#"echo line1; echo line2; echo '{"ops": 3}' >&2"#,
                Duration::from_secs(10),
            ))
            .await
            .unwrap();
        assert_eq!(out.primary, "line1\nline2\n");
        assert_eq!(out.diagnostics.trim(), r#"{"ops": 3}"#);
    }

    #[tokio::test]
    async fn binary_stdout_does_not_fail_the_job() {
        let exec = ProcessExecutor::default();
        let out = exec
            .execute(&sh(
                r#"printf 'bin \377\n'; echo '{"ops": 3}' >&2"#,
                Duration::from_secs(10),
            ))
            .await
            .unwrap();
        assert_eq!(out.primary, "bin \u{fffd}\n");
        assert_eq!(out.diagnostics.trim(), r#"{"ops": 3}"#);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_diagnostics() {
        let exec = ProcessExecutor::default();
        let err = exec
            .execute(&sh("echo boom >&2; exit 3", Duration::from_secs(10)))
            .await
            .unwrap_err();
        match err {
            ExecError::NonZeroExit { code, diagnostics } => {
                assert_eq!(code, 3);
                assert_eq!(diagnostics.trim(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_abandons_job() {
        let exec = ProcessExecutor::default();
        let started = std::time::Instant::now();
        let err = exec
            .execute(&sh("sleep 30", Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let exec = ProcessExecutor::default();
        let job = JobSpec {
            program: "/nonexistent/bin/owl".into(),
            args: vec![],
            timeout: Duration::from_secs(1),
            context: Vec::new(),
        };
        let err = exec.execute(&job).await.unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn primary_output_reaches_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiments.log");
        let relay = Arc::new(OutputRelay::to_file(&path, false).await.unwrap());
        let exec = ProcessExecutor::new(relay);

        exec.execute(&sh("echo hello", Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
