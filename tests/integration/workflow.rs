//! Complete workflow integration tests.
//!
//! Tests that verify the full pipeline from definition to report.

use batchpipe::pipelines::rom::{FOM_VAL, ROM_COMPARE, ROM_VAL, TRAIN, WRITE_PARAM};
use batchpipe::remote::RemoteCall;
use batchpipe::testing::TestHarness;
use batchpipe::{Event, FailureInjection, TaskId, TaskState, load_pipeline};
use std::time::Duration;

use crate::common::{diamond_job, input_dir, small_rom, write_pipeline};

#[tokio::test]
async fn test_diamond_submits_in_insertion_order() {
    let harness = TestHarness::new();

    let result = harness.run(&diamond_job()).await;

    assert!(result.is_success());
    assert_eq!(harness.service().submission_order(), vec!["a", "b", "c"]);
    assert_eq!(
        harness.recorder().finished().await,
        vec![TaskId::new("a"), TaskId::new("b"), TaskId::new("c")]
    );
}

#[tokio::test]
async fn test_rom_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_dir(dir.path());
    let pipeline = small_rom(&input);
    let injection = FailureInjection::new()
        .timings(FOM_VAL, "00:02:00", "00:01:00")
        .timings(ROM_VAL, "00:00:10", "00:00:10")
        .stdout(ROM_COMPARE, "max relative error 1.2e-3\n");
    let settings = pipeline
        .settings
        .clone()
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::ZERO);
    let harness = TestHarness::with_failure_injection(injection).with_settings(settings);

    let result = harness.run(&pipeline.job).await;
    let outcome = result.outcome.as_ref().unwrap();

    // every stage succeeded and the report compares the validation solves
    assert!(outcome.tasks.iter().all(|t| t.state() == TaskState::Success));
    let speedup = outcome.report.speedup.as_ref().unwrap();
    assert_eq!(speedup.ratio, 12.0);
    assert!(
        outcome
            .report
            .render()
            .contains("rom-val is 12.0 times quicker than fom-val")
    );
    assert_eq!(
        outcome.report.timing(&TaskId::new(TRAIN)).unwrap().instance_count,
        3
    );

    // the input directory was staged before any task was created
    let calls = harness.service().calls();
    let sync = calls
        .iter()
        .position(|c| *c == RemoteCall::SyncDirectory("input".into()))
        .unwrap();
    let first_task = calls
        .iter()
        .position(|c| matches!(c, RemoteCall::CreateTask(_)))
        .unwrap();
    assert!(sync < first_task);

    // dependencies were honoured
    let finished = harness.recorder().finished().await;
    let at = |name: &str| finished.iter().position(|t| t.as_str() == name).unwrap();
    assert!(at(TRAIN) < at("rom-build"));
    assert!(at(WRITE_PARAM) < at(FOM_VAL));
    assert!(at(ROM_VAL) < at(ROM_COMPARE));
    assert!(at(FOM_VAL) < at(ROM_COMPARE));

    // fresh output was streamed
    assert!(result.events.iter().any(|e| matches!(
        e,
        Event::TaskOutput { task_id, stdout, .. }
            if task_id.as_str() == ROM_COMPARE && stdout.contains("1.2e-3")
    )));

    // nothing is left on the service
    assert!(outcome.cleanup.is_clean());
    assert!(harness.service().live_tasks().is_empty());
    assert!(harness.service().live_buckets().is_empty());
}

#[tokio::test]
async fn test_long_cumulated_time_on_uncompared_stage_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let input = input_dir(dir.path());
    let pipeline = small_rom(&input);
    let injection = FailureInjection::new()
        .timings(TRAIN, "30:00:00", "01:10:00")
        .timings(WRITE_PARAM, "whenever", "00:00:01")
        .timings(FOM_VAL, "00:02:00", "00:01:00")
        .timings(ROM_VAL, "00:00:10", "00:00:10");
    let settings = pipeline
        .settings
        .clone()
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::ZERO);
    let harness = TestHarness::with_failure_injection(injection).with_settings(settings);

    let result = harness.run(&pipeline.job).await;
    let outcome = result.outcome.as_ref().unwrap();

    assert_eq!(outcome.report.speedup.as_ref().unwrap().ratio, 12.0);
    let train = outcome.report.timing(&TaskId::new(TRAIN)).unwrap();
    assert_eq!(train.execution_time, "30:00:00");
    assert_eq!(train.execution_secs, Some(108_000));
    let write = outcome.report.timing(&TaskId::new(WRITE_PARAM)).unwrap();
    assert_eq!(write.execution_time, "whenever");
    assert_eq!(write.execution_secs, None);
    assert!(outcome.report.render().contains("execution whenever"));
}

#[tokio::test]
async fn test_progress_counts_up_to_total() {
    let harness = TestHarness::new();

    let result = harness.run(&diamond_job()).await;

    let progress: Vec<(usize, usize)> = result
        .events
        .iter()
        .filter_map(|e| match e {
            Event::TaskFinished {
                finished, total, ..
            } => Some((*finished, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
}

#[tokio::test]
async fn test_yaml_pipeline_downloads_results() {
    let dir = tempfile::tempdir().unwrap();
    input_dir(dir.path());
    let path = write_pipeline(
        dir.path(),
        r#"
id: solve
name: solve-job
image: {repo: qarnotlab/pymor_fenics, tag: 2020.2.0_2019.1.0}
buckets:
  - id: input
    sync_dir: input
  - id: results
tasks:
  - id: solve
    instances: 2
    command: python3 main.py -o out/u
    resources: [input]
    results: results
    results_whitelist: .out
    download_to: downloaded
settings:
  poll_interval_ms: 1
  wait_timeout_ms: 0
"#,
    );

    let pipeline = load_pipeline(&path).unwrap();
    let harness = TestHarness::new().with_settings(pipeline.settings.clone());
    let result = harness.run(&pipeline.job).await;

    assert!(result.is_success());
    assert!(dir.path().join("downloaded").join("solve-0.out").exists());
    assert!(dir.path().join("downloaded").join("solve-1.out").exists());
    assert_eq!(
        harness.service().bucket_files("input"),
        Vec::<String>::new(),
        "bucket contents are purged on release"
    );
}
