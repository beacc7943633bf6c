//! Configuration loading for the sweep runner.
//!
//! Configuration is loaded from a TOML file (default: `sweep.toml`).
//! Every section is optional and falls back to its defaults, except that
//! a usable file must name a job program and at least one parameter.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use sweep_core::{
    MatrixError, MetricsError, MetricsParser, ParameterMatrix, ParameterSpec, Validity,
    DEFAULT_FLOAT_TOLERANCE, DEFAULT_SEPARATOR,
};
use sweep_types::ParamValue;

/// Root configuration for a sweep.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Job template.
    #[serde(default)]
    pub job: JobConfig,
    /// Parameter matrix, in declaration order.
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<ParameterSpec>,
    /// Result store.
    #[serde(default)]
    pub store: StoreConfig,
    /// Diagnostics parsing.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Failure handling.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Version tag pinned into every assignment (optional).
    #[serde(default)]
    pub version: Option<VersionConfig>,
    /// One-time setup before a real sweep.
    #[serde(default)]
    pub setup: SetupConfig,
    /// Per-trial hooks keyed by context parameter.
    #[serde(default, rename = "hook")]
    pub hooks: Vec<HookConfig>,
    /// Completion notification.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Experiment log output.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Which executor runs the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// Local child process (the program may itself be `ssh` or `docker`).
    #[default]
    Process,
    /// Exec inside a running container through the Docker API.
    Docker,
}

/// Job template configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Executor backend (default: process).
    #[serde(default)]
    pub executor: ExecutorKind,
    /// Program to run (process) or to exec inside the container (docker).
    #[serde(default)]
    pub program: String,
    /// Base arguments placed before the rendered flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock bound per trial in seconds (default: 300).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Prefix for rendered flags (default: `-D`, giving `-Da.b=value`).
    #[serde(default = "default_flag_format")]
    pub flag_format: String,
    /// Target container name (docker executor only).
    pub container: Option<String>,
}

/// What the controller does when the store cannot be queried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnreachablePolicy {
    /// Assume zero prior attempts and run the trial.
    #[default]
    FailOpen,
    /// Skip the trial for this pass.
    FailClosed,
}

/// Result store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to SQLite database file (default: sweep.db).
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Field that must be non-null for a record to count as a completed trial.
    pub valid_field: Option<String>,
    /// Allow-list of fields compared for dedup (default: every parameter).
    pub dedup_fields: Option<Vec<String>>,
    /// Relative tolerance for float fields (default: 1e-4).
    #[serde(default = "default_float_tolerance")]
    pub float_tolerance: f64,
    /// Store-unreachable policy (default: fail-open).
    #[serde(default)]
    pub on_unreachable: UnreachablePolicy,
}

/// Diagnostics parsing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Path separator for flattened keys (default: `_`).
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Regex whose matches are removed from every flattened key.
    pub strip_pattern: Option<String>,
}

/// What the controller does after a non-zero exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log and move on to the next combination.
    #[default]
    Continue,
    /// Stop the sweep.
    Abort,
}

/// Failure handling configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Policy on execution failure (default: continue).
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Stop once this many failures have been counted (optional).
    pub max_failures: Option<u64>,
}

/// Version tag configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
    /// Command whose output is the raw tag (e.g. `["git", "describe"]`).
    pub command: Vec<String>,
    /// Flag parameter the reduced tag is pinned under.
    pub parameter: String,
}

/// One-time setup configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfig {
    /// Commands run in order; any failure aborts the sweep.
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
    /// Readiness probes polled after the commands.
    #[serde(default)]
    pub probe: Vec<ProbeConfig>,
}

/// Readiness probe configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Command re-run until its output contains `pattern`.
    pub command: Vec<String>,
    /// Substring signalling readiness.
    pub pattern: String,
    /// Give up after this many seconds (default: 300).
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds between attempts (default: 1).
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
}

/// Per-trial hook configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    /// Context parameter whose value triggers the hook.
    pub parameter: String,
    /// Command prefix; the parameter value is appended, then `targets`.
    pub command: Vec<String>,
    /// Trailing arguments (e.g. the nodes to impair).
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Completion notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL; falls back to the `SWEEP_WEBHOOK_URL` environment variable.
    pub webhook_url: Option<String>,
    /// Sender name shown by the chat service (default: Experiments).
    #[serde(default = "default_username")]
    pub username: String,
    /// Sender icon (default: `:shipit:`).
    #[serde(default = "default_icon_emoji")]
    pub icon_emoji: String,
}

/// Experiment log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// File receiving primary job output (default: experiments.log).
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

// Default value functions
fn default_timeout_secs() -> u64 {
    5 * 60
}

fn default_flag_format() -> String {
    "-D".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("sweep.db")
}

fn default_float_tolerance() -> f64 {
    DEFAULT_FLOAT_TOLERANCE
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_probe_timeout_secs() -> u64 {
    300
}

fn default_probe_interval_secs() -> u64 {
    1
}

fn default_username() -> String {
    "Experiments".to_string()
}

fn default_icon_emoji() -> String {
    ":shipit:".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("experiments.log")
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::default(),
            program: String::new(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            flag_format: default_flag_format(),
            container: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            valid_field: None,
            dedup_fields: None,
            float_tolerance: default_float_tolerance(),
            on_unreachable: UnreachablePolicy::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            strip_pattern: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: default_username(),
            icon_emoji: default_icon_emoji(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
        }
    }
}

impl StoreConfig {
    /// Validity condition derived from `valid_field`.
    pub fn validity(&self) -> Validity {
        match &self.valid_field {
            Some(field) => Validity::NotNull(field.clone()),
            None => Validity::Always,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job.program.is_empty() {
            return Err(ConfigError::Invalid("job.program must be set".into()));
        }
        if self.job.timeout_secs == 0 {
            return Err(ConfigError::Invalid("job.timeout_secs must be > 0".into()));
        }
        if self.job.executor == ExecutorKind::Docker && self.job.container.is_none() {
            return Err(ConfigError::Invalid(
                "job.container is required for the docker executor".into(),
            ));
        }
        if let Some(version) = &self.version {
            if version.command.is_empty() {
                return Err(ConfigError::Invalid("version.command is empty".into()));
            }
        }
        for hook in &self.hooks {
            if hook.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "hook for {} has an empty command",
                    hook.parameter
                )));
            }
        }
        if self.setup.commands.iter().any(Vec::is_empty)
            || self.setup.probe.iter().any(|p| p.command.is_empty())
        {
            return Err(ConfigError::Invalid("setup contains an empty command".into()));
        }
        for spec in &self.parameters {
            if spec
                .values
                .iter()
                .any(|v| matches!(v, ParamValue::Float(f) if !f.is_finite()))
            {
                return Err(ConfigError::Invalid(format!(
                    "parameter {} has a non-finite value",
                    spec.name
                )));
            }
        }
        if !(self.store.float_tolerance > 0.0) {
            return Err(ConfigError::Invalid(
                "store.float_tolerance must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Build the parameter matrix.
    pub fn matrix(&self) -> Result<ParameterMatrix, MatrixError> {
        ParameterMatrix::new(self.parameters.clone())
    }

    /// Build the metrics parser.
    pub fn metrics_parser(&self) -> Result<MetricsParser, MetricsError> {
        let parser = MetricsParser::new(&self.metrics.separator);
        match &self.metrics.strip_pattern {
            Some(pattern) => parser.with_strip_pattern(pattern),
            None => Ok(parser),
        }
    }

    /// Webhook URL from config, else from `SWEEP_WEBHOOK_URL`.
    pub fn webhook_url(&self) -> Option<String> {
        self.notify
            .webhook_url
            .clone()
            .or_else(|| std::env::var("SWEEP_WEBHOOK_URL").ok())
            .filter(|url| !url.is_empty())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Parsed but inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_types::ParamRole;

    const FULL: &str = r#"
[job]
executor = "docker"
container = "owl_c1"
program = "bin/owl"
timeout_secs = 120

[[parameter]]
name = "ipa_consistency"
values = ["strong", "weak"]

[[parameter]]
name = "ipa_concurrent_requests"
values = [16, 128]

[[parameter]]
name = "impairment_mode"
role = "context"
values = ["slow"]

[store]
database = "/data/ipa.db"
valid_field = "meters_retwis_op_count"
on_unreachable = "fail-closed"

[metrics]
strip_pattern = 'owl\.\w+\.'

[policy]
on_failure = "abort"
max_failures = 3

[version]
command = ["git", "describe"]
parameter = "ipa_version"

[setup]
commands = [["sbt", "docker:publishLocal"]]

[[setup.probe]]
command = ["docker", "logs", "owl_s3"]
pattern = "listening for CQL clients"

[[hook]]
parameter = "impairment_mode"
command = ["sudo", "blockade"]
targets = ["s1", "s2", "s3"]

[notify]
webhook_url = "https://hooks.example.com/T000"
"#;

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.job.executor, ExecutorKind::Docker);
        assert_eq!(config.job.container.as_deref(), Some("owl_c1"));
        assert_eq!(config.job.timeout_secs, 120);
        assert_eq!(config.job.flag_format, "-D");
        assert_eq!(config.parameters.len(), 3);
        assert_eq!(config.parameters[2].role, ParamRole::Context);
        assert_eq!(config.store.database, PathBuf::from("/data/ipa.db"));
        assert_eq!(config.store.on_unreachable, UnreachablePolicy::FailClosed);
        assert_eq!(
            config.store.validity(),
            Validity::NotNull("meters_retwis_op_count".into())
        );
        assert_eq!(config.policy.on_failure, FailurePolicy::Abort);
        assert_eq!(config.policy.max_failures, Some(3));
        assert_eq!(config.setup.probe[0].timeout_secs, 300);
        assert_eq!(config.setup.probe[0].interval_secs, 1);
        assert_eq!(config.hooks[0].targets, vec!["s1", "s2", "s3"]);
        assert_eq!(config.notify.username, "Experiments");
        assert_eq!(config.matrix().unwrap().len(), 4);
        assert!(config.metrics_parser().is_ok());
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str(
            r#"
[job]
program = "./bench"

[[parameter]]
name = "x"
values = [1]
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.job.executor, ExecutorKind::Process);
        assert_eq!(config.job.timeout_secs, 300);
        assert_eq!(config.store.database, PathBuf::from("sweep.db"));
        assert_eq!(config.store.float_tolerance, 1e-4);
        assert_eq!(config.store.on_unreachable, UnreachablePolicy::FailOpen);
        assert_eq!(config.store.validity(), Validity::Always);
        assert_eq!(config.metrics.separator, "_");
        assert_eq!(config.policy.on_failure, FailurePolicy::Continue);
        assert_eq!(config.output.log_file, PathBuf::from("experiments.log"));
        assert!(config.version.is_none());
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn missing_program_is_invalid() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn non_finite_parameter_values_are_invalid() {
        let config: Config = toml::from_str(
            r#"
[job]
program = "bin/owl"

[[parameter]]
name = "zipf"
values = [0.5, nan]
"#,
        )
        .unwrap();
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("zipf")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(config.matrix().unwrap_err(), MatrixError::NonFinite("zipf".into()));
    }

    #[test]
    fn docker_requires_container() {
        let config: Config = toml::from_str(
            r#"
[job]
executor = "docker"
program = "bin/owl"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("job.container"));
    }

    #[test]
    fn bad_strip_pattern_is_reported() {
        let config: Config = toml::from_str(
            r#"
[metrics]
strip_pattern = "("
"#,
        )
        .unwrap();
        assert!(config.metrics_parser().is_err());
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/sweep.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        std::fs::write(&path, "[job\nprogram = ").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
