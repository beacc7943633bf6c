//! End-to-end sweeps against a real SQLite store.

use std::sync::Arc;
use std::time::Duration;
use sweep_core::{CountQuery, HaltReason, ParameterMatrix, ParameterSpec, Validity};
use sweep_runner::{
    CancelToken, JobTemplate, MockExecutor, MockOutcome, OutputRelay, ProcessExecutor,
    RecordingNotifier, ResultStore, SqliteStore, SweepController, SweepOptions,
};
use sweep_types::{ParamRole, ParamValue, ParameterAssignment, ResultRecord};

fn matrix() -> ParameterMatrix {
    ParameterMatrix::new(vec![
        ParameterSpec::flag(
            "consistency",
            vec![ParamValue::from("strong"), ParamValue::from("weak")],
        ),
        ParameterSpec::flag("load", vec![ParamValue::Int(16), ParamValue::Int(128)]),
    ])
    .unwrap()
}

fn template() -> JobTemplate {
    JobTemplate::new("bin/owl", vec![], "-D", Duration::from_secs(5))
}

fn opts(target: u64) -> SweepOptions {
    SweepOptions::new(target)
}

fn assignment(consistency: &str, load: i64) -> ParameterAssignment {
    ParameterAssignment::new()
        .with("consistency", ParamRole::Flag, consistency)
        .unwrap()
        .with("load", ParamRole::Flag, load)
        .unwrap()
}

fn query(a: &ParameterAssignment) -> CountQuery {
    CountQuery::for_assignment(a, None, Validity::NotNull("total_time".into()), 1e-4)
}

async fn seed(store: &SqliteStore, a: &ParameterAssignment, n: usize) {
    for _ in 0..n {
        let mut record = ResultRecord::from_assignment(a);
        record.merge_metric("total_time", "60.0");
        store.insert(&record).await.unwrap();
    }
}

fn controller(exec: &MockExecutor, store: &SqliteStore) -> SweepController {
    SweepController::new(Box::new(exec.clone()), Box::new(store.clone()), template()).with_dedup(
        None,
        Validity::NotNull("total_time".into()),
        1e-4,
    )
}

#[tokio::test]
async fn full_sweep_reaches_target_for_every_combination() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    let exec = MockExecutor::succeeding_with(r#"{"total_time": 61.5, "meters": {"op": {"count": 10}}}"#);

    let summary = controller(&exec, &store).run(&matrix(), &opts(2)).await;

    assert_eq!(exec.calls(), 8);
    assert_eq!(summary.executed, 8);
    assert_eq!(summary.recorded, 8);
    assert_eq!(store.total().await.unwrap(), 8);
    for a in &matrix() {
        assert_eq!(store.try_count(&query(&a)).await.unwrap(), 2, "{a}");
    }
}

#[tokio::test]
async fn runs_only_the_missing_repeats() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    seed(&store, &assignment("strong", 16), 1).await;
    seed(&store, &assignment("weak", 128), 5).await;
    let exec = MockExecutor::succeeding_with(r#"{"total_time": 60.0}"#);

    let summary = controller(&exec, &store).run(&matrix(), &opts(3)).await;

    // (3-1) + 3 + 3 + max(0, 3-5)
    assert_eq!(exec.calls(), 8);
    assert_eq!(summary.executed, 8);
    assert_eq!(
        store.try_count(&query(&assignment("strong", 16))).await.unwrap(),
        3
    );
    assert_eq!(
        store.try_count(&query(&assignment("weak", 128))).await.unwrap(),
        5
    );
}

#[tokio::test]
async fn resume_reexecutes_only_unfinished_assignments() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    seed(&store, &assignment("strong", 16), 1).await;
    seed(&store, &assignment("strong", 128), 1).await;
    let exec = MockExecutor::succeeding_with(r#"{"total_time": 60.0}"#);

    controller(&exec, &store).run(&matrix(), &opts(1)).await;

    let ran: Vec<Vec<String>> = exec.jobs().into_iter().map(|j| j.args).collect();
    assert_eq!(
        ran,
        vec![
            vec!["-Dconsistency=weak".to_string(), "-Dload=16".to_string()],
            vec!["-Dconsistency=weak".to_string(), "-Dload=128".to_string()],
        ]
    );

    // A second run finds nothing left to do.
    let again = MockExecutor::new();
    let summary = controller(&again, &store).run(&matrix(), &opts(1)).await;
    assert_eq!(again.calls(), 0);
    assert_eq!(summary.skipped, 4);
}

#[tokio::test]
async fn dry_run_reports_counts_without_executing() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    seed(&store, &assignment("weak", 16), 2).await;
    let exec = MockExecutor::new();
    let recorder = RecordingNotifier::new();

    let summary = controller(&exec, &store)
        .with_notifier(Box::new(recorder.clone()))
        .run(&matrix(), &opts(3).dry_run(true))
        .await;

    assert_eq!(exec.calls(), 0);
    assert_eq!(summary.executed, 0);
    assert_eq!(summary.statuses.len(), 4);
    let stored: Vec<u64> = summary.statuses.iter().map(|s| s.stored).collect();
    assert_eq!(stored, vec![0, 0, 2, 0]);
    assert_eq!(summary.statuses[2].remaining(), 1);
    assert!(summary.statuses.iter().all(|s| s.target == 3));
    assert_eq!(recorder.messages().len(), 1);
}

#[tokio::test]
async fn timed_out_trial_records_nothing_and_sweep_continues() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    let exec = MockExecutor::succeeding_with(r#"{"total_time": 60.0}"#);
    exec.push(MockOutcome::TimeOut);

    let summary = controller(&exec, &store).run(&matrix(), &opts(1)).await;

    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.recorded, 3);
    assert_eq!(summary.halted, None);
    assert_eq!(
        store.try_count(&query(&assignment("strong", 16))).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn cancellation_halts_after_in_flight_trial() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    let exec = MockExecutor::succeeding_with(r#"{"total_time": 60.0}"#);
    let cancel = CancelToken::new();
    let recorder = RecordingNotifier::new();
    exec.push(MockOutcome::Succeed(r#"{"total_time": 60.0}"#.into()));
    exec.push(MockOutcome::Interrupt(cancel.clone()));

    let summary = controller(&exec, &store)
        .with_cancel_token(cancel)
        .with_notifier(Box::new(recorder.clone()))
        .run(&matrix(), &opts(2))
        .await;

    assert_eq!(exec.calls(), 2);
    assert_eq!(summary.recorded, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.halted, Some(HaltReason::Cancelled));
    assert_eq!(store.total().await.unwrap(), 1);

    let messages = recorder.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Halted: cancelled by operator."));
}

#[cfg(unix)]
#[tokio::test]
async fn process_executor_sweep_with_real_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("experiments.log");
    let store = SqliteStore::new(&dir.path().join("sweep.db"), "owl")
        .await
        .unwrap();
    let relay = Arc::new(OutputRelay::to_file(&log, false).await.unwrap());

    // The job echoes its flags and reports metrics on stderr.
    let template = JobTemplate::new(
        "sh",
        vec![
            "-c".into(),
            r#"echo "args: $*"; echo '{"total_time": 1.5, "owl.retwis.op": {"count": 3}}' >&2"#
                .into(),
            "owl".into(),
        ],
        "-D",
        Duration::from_secs(10),
    );
    let parser = sweep_core::MetricsParser::default()
        .with_strip_pattern(r"owl\.\w+\.")
        .unwrap();
    let controller = SweepController::new(
        Box::new(ProcessExecutor::new(relay.clone())),
        Box::new(store.clone()),
        template,
    )
    .with_parser(parser)
    .with_relay(relay)
    .with_dedup(None, Validity::NotNull("op_count".into()), 1e-4);

    let summary = controller.run(&matrix(), &opts(1)).await;
    assert_eq!(summary.recorded, 4);

    let a = assignment("weak", 128);
    let q = CountQuery::for_assignment(&a, None, Validity::NotNull("op_count".into()), 1e-4);
    assert_eq!(store.try_count(&q).await.unwrap(), 1);

    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.contains("args: -Dconsistency=weak -Dload=128"));
}

#[cfg(unix)]
#[tokio::test]
async fn process_timeout_is_classified_and_not_recorded() {
    let store = SqliteStore::in_memory("owl").await.unwrap();
    let template = JobTemplate::new(
        "sh",
        vec!["-c".into(), "sleep 30".into(), "owl".into()],
        "-D",
        Duration::from_millis(200),
    );
    let single = ParameterMatrix::new(vec![ParameterSpec::flag(
        "load",
        vec![ParamValue::Int(16)],
    )])
    .unwrap();
    let controller = SweepController::new(
        Box::new(ProcessExecutor::default()),
        Box::new(store.clone()),
        template,
    );

    let summary = controller.run(&single, &opts(1)).await;
    assert_eq!(summary.timed_out, 1);
    assert_eq!(store.total().await.unwrap(), 0);
}
