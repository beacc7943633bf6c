//! Setup commands, readiness probes and per-trial hooks.
//!
//! These are thin argv invocations of external tools (build systems,
//! cluster bring-up, impairment toggles). Nothing here interprets what
//! the tools do; only exit status and output text are checked.

use crate::config::{HookConfig, ProbeConfig, SetupConfig};
use crate::executor::OutputRelay;
use std::process::Stdio;
use std::time::{Duration, Instant};
use sweep_types::{ParamValue, ParameterAssignment};
use thiserror::Error;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from external helper commands.
#[derive(Debug, Error)]
pub enum HookError {
    /// Command list was empty.
    #[error("empty command")]
    EmptyCommand,

    /// Command could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Command exited unsuccessfully.
    #[error("`{command}` exited with code {code}: {stderr}")]
    Failed {
        /// The command line, space-joined.
        command: String,
        /// Exit code (-1 if killed by a signal).
        code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Probe pattern never appeared.
    #[error("`{command}` did not print {pattern:?} within {waited:?}")]
    ProbeTimeout {
        /// The probe command line, space-joined.
        command: String,
        /// Pattern waited for.
        pattern: String,
        /// How long we waited.
        waited: Duration,
    },

    /// I/O error while reading command output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a command to completion, relaying stdout line by line.
///
/// Returns the captured stdout.
pub async fn run_command(argv: &[String], relay: &OutputRelay) -> Result<String, HookError> {
    let (program, args) = argv.split_first().ok_or(HookError::EmptyCommand)?;
    debug!(command = %argv.join(" "), "running command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HookError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let relay_stdout = async move {
        match stdout {
            Some(stdout) => relay.relay_lines(BufReader::new(stdout)).await,
            None => Ok(String::new()),
        }
    };
    let capture_stderr = async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf).into_owned())
    };

    let (stdout, stderr) = tokio::try_join!(relay_stdout, capture_stderr)?;
    let status = child.wait().await?;

    if status.success() {
        Ok(stdout)
    } else {
        Err(HookError::Failed {
            command: argv.join(" "),
            code: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        })
    }
}

/// Run a command and return stdout and stderr together, ignoring exit status.
async fn capture_any(argv: &[String]) -> Result<String, HookError> {
    let (program, args) = argv.split_first().ok_or(HookError::EmptyCommand)?;
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| HookError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Re-run the probe command until its output contains the pattern.
pub async fn wait_for_probe(probe: &ProbeConfig) -> Result<(), HookError> {
    let timeout = Duration::from_secs(probe.timeout_secs);
    let interval = Duration::from_secs(probe.interval_secs.max(1));
    let started = Instant::now();

    info!(command = %probe.command.join(" "), pattern = %probe.pattern, "waiting for readiness");
    loop {
        let output = capture_any(&probe.command).await?;
        if output.contains(&probe.pattern) {
            debug!(elapsed = ?started.elapsed(), "probe satisfied");
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(HookError::ProbeTimeout {
                command: probe.command.join(" "),
                pattern: probe.pattern.clone(),
                waited: started.elapsed(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Run every setup command, then wait for every probe.
pub async fn run_setup(setup: &SetupConfig, relay: &OutputRelay) -> Result<(), HookError> {
    for command in &setup.commands {
        info!(command = %command.join(" "), "setup");
        run_command(command, relay).await?;
    }
    for probe in &setup.probe {
        wait_for_probe(probe).await?;
    }
    Ok(())
}

/// A command run before each trial whose assignment carries `parameter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialHook {
    /// Parameter that triggers the hook.
    pub parameter: String,
    /// Command prefix.
    pub command: Vec<String>,
    /// Trailing arguments.
    pub targets: Vec<String>,
}

impl From<&HookConfig> for TrialHook {
    fn from(config: &HookConfig) -> Self {
        Self {
            parameter: config.parameter.clone(),
            command: config.command.clone(),
            targets: config.targets.clone(),
        }
    }
}

impl TrialHook {
    /// Build the argv: `command ++ [value] ++ targets`.
    ///
    /// Returns args for e.g. `sudo blockade slow s1 s2 s3`.
    pub fn to_args(&self, value: &ParamValue) -> Vec<String> {
        let mut args = self.command.clone();
        args.push(value.to_string());
        args.extend(self.targets.iter().cloned());
        args
    }
}

/// Every configured per-trial hook, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    hooks: Vec<TrialHook>,
}

impl HookSet {
    /// Build from the `[[hook]]` sections.
    pub fn from_config(configs: &[HookConfig]) -> Self {
        Self {
            hooks: configs.iter().map(TrialHook::from).collect(),
        }
    }

    /// True if no hooks are configured.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Commands that would run before a trial of `assignment`.
    pub fn commands_for(&self, assignment: &ParameterAssignment) -> Vec<Vec<String>> {
        self.hooks
            .iter()
            .filter_map(|hook| {
                assignment
                    .get(&hook.parameter)
                    .map(|value| hook.to_args(value))
            })
            .collect()
    }

    /// Run the hooks for `assignment`; the first failure stops the rest.
    pub async fn before_trial(
        &self,
        assignment: &ParameterAssignment,
        relay: &OutputRelay,
    ) -> Result<(), HookError> {
        for argv in self.commands_for(assignment) {
            info!(command = %argv.join(" "), "before-trial hook");
            run_command(&argv, relay).await?;
        }
        Ok(())
    }
}
