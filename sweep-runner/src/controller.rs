//! The sweep controller.
//!
//! Drives every assignment of a matrix to a target repeat count. The
//! decision to run a trial is re-derived from the store on every pass,
//! so an interrupted sweep resumes by simply running it again.

use crate::cancel::CancelToken;
use crate::cluster;
use crate::config::{Config, FailurePolicy, UnreachablePolicy};
use crate::error::RunnerError;
use crate::executor::{ExecError, JobOutput, JobSpec, JobTemplate, OutputRelay, TrialExecutor};
use crate::hooks::HookSet;
use crate::notify::{Notifier, NoopNotifier};
use crate::storage::{unix_now, ResultStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use sweep_core::{
    AssignmentStatus, CountQuery, FailureKind, HaltReason, MetricsParser, ParameterMatrix,
    SweepSummary, TrialEvent, TrialState, Validity, DEFAULT_FLOAT_TOLERANCE,
};
use sweep_types::{
    ParamRole, ParamValue, ParameterAssignment, ResultRecord, RECORDED_AT_FIELD, SWEEP_ID_FIELD,
};
use tracing::{debug, error, info, warn};

/// Per-invocation options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    /// Records wanted per assignment.
    pub target: u64,
    /// Only report counts; never execute.
    pub dry_run: bool,
    /// Failures already charged against the failure budget.
    pub failures: u64,
    /// Id stored with every record of this invocation.
    pub sweep_id: String,
}

impl SweepOptions {
    /// Options for a real sweep to `target` with a fresh sweep id.
    pub fn new(target: u64) -> Self {
        Self {
            target,
            dry_run: false,
            failures: 0,
            sweep_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Switch to dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Seed the failure count.
    pub fn failures(mut self, failures: u64) -> Self {
        self.failures = failures;
        self
    }
}

/// Build the matrix from config, pinning the version tag when configured.
pub async fn resolve_matrix(config: &Config) -> Result<ParameterMatrix, RunnerError> {
    let matrix = config.matrix()?;
    let Some(version) = &config.version else {
        return Ok(matrix);
    };
    let tag = cluster::version_tag(&version.command).await?;
    info!(%tag, parameter = %version.parameter, "pinning version tag");
    Ok(matrix.pin(&version.parameter, ParamRole::Flag, tag)?)
}

/// Orchestrates trials over a matrix.
///
/// Owns its executor, store and notifier for its whole lifetime.
pub struct SweepController {
    executor: Box<dyn TrialExecutor>,
    store: Box<dyn ResultStore>,
    notifier: Box<dyn Notifier>,
    template: JobTemplate,
    parser: MetricsParser,
    hooks: HookSet,
    relay: Arc<OutputRelay>,
    cancel: CancelToken,
    dedup_fields: Option<Vec<String>>,
    validity: Validity,
    tolerance: f64,
    on_unreachable: UnreachablePolicy,
    on_failure: FailurePolicy,
    max_failures: Option<u64>,
}

impl SweepController {
    /// Create a controller with default policies and no hooks or notifier.
    pub fn new(
        executor: Box<dyn TrialExecutor>,
        store: Box<dyn ResultStore>,
        template: JobTemplate,
    ) -> Self {
        Self {
            executor,
            store,
            notifier: Box::new(NoopNotifier),
            template,
            parser: MetricsParser::default(),
            hooks: HookSet::default(),
            relay: Arc::new(OutputRelay::disabled()),
            cancel: CancelToken::new(),
            dedup_fields: None,
            validity: Validity::Always,
            tolerance: DEFAULT_FLOAT_TOLERANCE,
            on_unreachable: UnreachablePolicy::default(),
            on_failure: FailurePolicy::default(),
            max_failures: None,
        }
    }

    /// Create a controller configured from every relevant config section.
    pub fn from_config(
        config: &Config,
        executor: Box<dyn TrialExecutor>,
        store: Box<dyn ResultStore>,
    ) -> Result<Self, RunnerError> {
        let controller = Self::new(executor, store, JobTemplate::from_config(&config.job))
            .with_parser(config.metrics_parser()?)
            .with_hooks(HookSet::from_config(&config.hooks))
            .with_dedup(
                config.store.dedup_fields.clone(),
                config.store.validity(),
                config.store.float_tolerance,
            )
            .with_unreachable_policy(config.store.on_unreachable)
            .with_failure_policy(config.policy.on_failure, config.policy.max_failures);
        Ok(controller)
    }

    /// Set the summary notifier.
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the metrics parser.
    pub fn with_parser(mut self, parser: MetricsParser) -> Self {
        self.parser = parser;
        self
    }

    /// Set the per-trial hooks.
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the output relay used for banners and hook output.
    pub fn with_relay(mut self, relay: Arc<OutputRelay>) -> Self {
        self.relay = relay;
        self
    }

    /// Set the cancellation token observed while trials run.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the dedup predicate parameters.
    pub fn with_dedup(
        mut self,
        fields: Option<Vec<String>>,
        validity: Validity,
        tolerance: f64,
    ) -> Self {
        self.dedup_fields = fields;
        self.validity = validity;
        self.tolerance = tolerance;
        self
    }

    /// Set the store-unreachable policy.
    pub fn with_unreachable_policy(mut self, policy: UnreachablePolicy) -> Self {
        self.on_unreachable = policy;
        self
    }

    /// Set the failure policy and optional budget.
    pub fn with_failure_policy(mut self, policy: FailurePolicy, max_failures: Option<u64>) -> Self {
        self.on_failure = policy;
        self.max_failures = max_failures;
        self
    }

    fn query_for(&self, assignment: &ParameterAssignment) -> CountQuery {
        CountQuery::for_assignment(
            assignment,
            self.dedup_fields.as_deref(),
            self.validity.clone(),
            self.tolerance,
        )
    }

    /// Run the sweep and send the summary.
    pub async fn run(&self, matrix: &ParameterMatrix, opts: &SweepOptions) -> SweepSummary {
        info!(
            assignments = matrix.len(),
            target = opts.target,
            dry_run = opts.dry_run,
            sweep_id = %opts.sweep_id,
            "starting sweep"
        );

        let summary = if opts.dry_run {
            self.dry_run(matrix, opts).await
        } else {
            self.sweep(matrix, opts).await
        };

        let message = summary.message();
        info!("{}", message);
        self.notifier.notify(&message).await;
        summary
    }

    /// Report current versus target counts without executing anything.
    async fn dry_run(&self, matrix: &ParameterMatrix, opts: &SweepOptions) -> SweepSummary {
        let mut summary = SweepSummary::default();
        for assignment in matrix {
            let stored = self.store.count(&self.query_for(&assignment)).await;
            info!(%assignment, count = stored, target = opts.target, "dry run");
            if stored >= opts.target {
                summary.skipped += 1;
            }
            summary.statuses.push(AssignmentStatus {
                assignment,
                stored,
                target: opts.target,
            });
        }
        summary
    }

    async fn sweep(&self, matrix: &ParameterMatrix, opts: &SweepOptions) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let mut failures = opts.failures;

        'passes: for repeat in 1..=opts.target {
            info!(repeat, "starting pass");
            self.relay.banner(&format!("starting trial {}", repeat)).await;

            for assignment in matrix {
                if self.cancel.is_cancelled() {
                    summary.halted = Some(HaltReason::Cancelled);
                    break 'passes;
                }

                let state = self.trial(&assignment, repeat, opts, &mut summary).await;
                summary.observe(state);

                let TrialState::Failed(kind) = state else {
                    continue;
                };
                if kind.halts_sweep() {
                    warn!(%assignment, "job cancelled, halting sweep");
                    summary.halted = Some(HaltReason::Cancelled);
                    break 'passes;
                }
                if kind == FailureKind::StoreFailure {
                    continue;
                }

                failures += 1;
                if kind.is_execution_failure() && self.on_failure == FailurePolicy::Abort {
                    summary.halted = Some(HaltReason::FailurePolicy);
                    break 'passes;
                }
                if self.max_failures.is_some_and(|max| failures >= max) {
                    warn!(failures, "failure budget exhausted");
                    summary.halted = Some(HaltReason::FailureBudget);
                    break 'passes;
                }
            }
        }
        summary
    }

    /// Decide, and if needed run, one trial.
    async fn trial(
        &self,
        assignment: &ParameterAssignment,
        repeat: u64,
        opts: &SweepOptions,
        summary: &mut SweepSummary,
    ) -> TrialState {
        let counted = match self.store.try_count(&self.query_for(assignment)).await {
            Ok(stored) => {
                info!(%assignment, count = stored, "count");
                TrialEvent::Counted { stored, repeat }
            }
            Err(e) => {
                summary.store_errors += 1;
                match self.on_unreachable {
                    UnreachablePolicy::FailOpen => {
                        warn!(error = %e, %assignment, "count failed, assuming no prior trials");
                        TrialEvent::Counted { stored: 0, repeat }
                    }
                    UnreachablePolicy::FailClosed => {
                        warn!(error = %e, %assignment, "count failed, skipping trial");
                        TrialEvent::StoreUnavailable
                    }
                }
            }
        };

        let state = TrialState::default().on_event(counted);
        if state != TrialState::Running {
            return state;
        }
        state.on_event(self.execute(assignment, opts).await)
    }

    /// Run hooks and the job, then record the result.
    async fn execute(&self, assignment: &ParameterAssignment, opts: &SweepOptions) -> TrialEvent {
        self.relay.banner(&assignment.to_string()).await;

        if let Some(kind) = self.run_hooks(assignment).await {
            return TrialEvent::Failed(kind);
        }

        let job = self.template.render(assignment);
        info!(argv = %job.argv().join(" "), "> running job");

        let output = match self.run_job(&job).await {
            Ok(output) => output,
            Err(e) => return TrialEvent::Failed(classify(&e, assignment)),
        };

        let metrics = match self.parser.parse(&output.diagnostics) {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(error = %e, %assignment, "could not parse job diagnostics");
                return TrialEvent::Failed(FailureKind::MalformedMetrics);
            }
        };

        let record = build_record(assignment, metrics, &opts.sweep_id);
        debug!(record = ?record, "recording trial");

        match self.store.insert(&record).await {
            Ok(()) => {
                info!(%assignment, fields = record.len(), "trial recorded");
                TrialEvent::Succeeded
            }
            Err(e) => {
                error!(error = %e, %assignment, "failed to store trial record");
                TrialEvent::Failed(FailureKind::StoreFailure)
            }
        }
    }

    /// Run the before-trial hooks under the job timeout, racing them
    /// against operator cancellation. Returns the failure, if any.
    async fn run_hooks(&self, assignment: &ParameterAssignment) -> Option<FailureKind> {
        if self.hooks.is_empty() {
            return None;
        }
        let timeout = self.template.timeout();
        let hooks = tokio::time::timeout(timeout, self.hooks.before_trial(assignment, &self.relay));
        tokio::select! {
            result = hooks => match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    error!(error = %e, %assignment, "before-trial hook failed");
                    Some(FailureKind::ExecutionFailure)
                }
                Err(_) => {
                    error!(%assignment, timeout = ?timeout, "before-trial hook timed out");
                    Some(FailureKind::ExecutionFailure)
                }
            },
            _ = self.cancel.cancelled() => {
                warn!(%assignment, "before-trial hook cancelled");
                Some(FailureKind::Cancelled)
            }
        }
    }

    /// Execute a job, racing it against operator cancellation.
    async fn run_job(&self, job: &JobSpec) -> Result<JobOutput, ExecError> {
        tokio::select! {
            result = self.executor.execute(job) => result,
            _ = self.cancel.cancelled() => Err(ExecError::Cancelled),
        }
    }

    /// Run one job with a literal argv appended; records nothing.
    ///
    /// Returns the parsed metrics if the diagnostics were valid.
    pub async fn run_manual(
        &self,
        argv: &[String],
        machines: &[String],
    ) -> Result<Option<BTreeMap<String, String>>, RunnerError> {
        let mut job = self.template.manual(argv);
        job.context
            .push(("machines".to_string(), ParamValue::from(machines.join(","))));
        info!(argv = %job.argv().join(" "), "> running manual job");

        let output = self.run_job(&job).await?;
        match self.parser.parse(&output.diagnostics) {
            Ok(metrics) => Ok(Some(metrics)),
            Err(e) => {
                debug!(error = %e, "manual job produced no metrics");
                Ok(None)
            }
        }
    }
}

/// Map an executor error to a trial failure, logging it.
fn classify(err: &ExecError, assignment: &ParameterAssignment) -> FailureKind {
    match err {
        ExecError::TimedOut(after) => {
            warn!(%assignment, timeout = ?after, "job timed out");
            FailureKind::TimedOut
        }
        ExecError::Cancelled => {
            warn!(%assignment, "job cancelled");
            FailureKind::Cancelled
        }
        ExecError::NonZeroExit { code, diagnostics } => {
            error!(%assignment, code, output = %diagnostics.trim(), "job failed");
            FailureKind::ExecutionFailure
        }
        other => {
            error!(%assignment, error = %other, "job could not run");
            FailureKind::ExecutionFailure
        }
    }
}

/// Merge an assignment, flattened metrics and metadata into one record.
///
/// Assignment fields win over colliding metric keys.
pub fn build_record(
    assignment: &ParameterAssignment,
    metrics: BTreeMap<String, String>,
    sweep_id: &str,
) -> ResultRecord {
    let mut record = ResultRecord::from_assignment(assignment);
    record.set(SWEEP_ID_FIELD, sweep_id);
    record.set(RECORDED_AT_FIELD, unix_now());

    for (key, value) in metrics {
        if key.is_empty() {
            warn!(%value, "dropping metric without a name");
            continue;
        }
        if !record.merge_metric(key.as_str(), value) {
            warn!(field = %key, "metric collides with a record field, keeping the record value");
        }
    }
    record
}
