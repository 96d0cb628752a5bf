//! Failure propagation tests.
//!
//! A failing task stops the run, its error list reaches the caller and the
//! remote objects are released unless asked otherwise.

use batchpipe::pipelines::rom::{FOM_VAL, ROM_COMPARE, ROM_VAL};
use batchpipe::remote::RemoteCall;
use batchpipe::report::ReportError;
use batchpipe::testing::TestHarness;
use batchpipe::{
    CleanupPolicy, Event, ExecutionError, FailureInjection, Pipeline, RunSettings, TaskId,
};
use std::time::Duration;

use crate::common::{diamond_job, events_for_after, input_dir, position, small_rom};

fn fast(pipeline: &Pipeline) -> RunSettings {
    pipeline
        .settings
        .clone()
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::ZERO)
}

#[tokio::test]
async fn test_failed_stage_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = small_rom(&input_dir(dir.path()));
    let injection = FailureInjection::new().fail_with(FOM_VAL, "OOM");
    let harness = TestHarness::with_failure_injection(injection).with_settings(fast(&pipeline));

    let result = harness.run(&pipeline.job).await;
    let failure = result.outcome.as_ref().err().unwrap();

    match &failure.error {
        ExecutionError::TaskFailed {
            task,
            state,
            errors,
            diagnostics,
        } => {
            assert_eq!(task.as_str(), FOM_VAL);
            assert_eq!(state, "Failure");
            assert_eq!(errors, &vec!["OOM".to_string()]);
            assert!(diagnostics.contains("console.qarnot.com"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(failure.to_string().contains("OOM"));

    // no report, and the comparison stage never ran
    assert!(!result.events.iter().any(|e| matches!(
        e,
        Event::TaskFinished { task_id, .. } if task_id.as_str() == ROM_COMPARE
    )));

    // everything was released and the dependent stage cancelled
    assert!(failure.cleanup.job_deleted);
    assert!(failure.cleanup.failures.is_empty());
    assert!(harness.service().live_tasks().is_empty());
    assert!(harness.service().live_buckets().is_empty());
    assert_eq!(
        harness.service().task_state(ROM_COMPARE).as_deref(),
        Some("Cancelled")
    );
}

#[tokio::test]
async fn test_failed_task_is_not_polled_again() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = small_rom(&input_dir(dir.path()));
    let injection = FailureInjection::new().fail_with(FOM_VAL, "OOM");
    let harness = TestHarness::with_failure_injection(injection).with_settings(fast(&pipeline));

    let result = harness.run(&pipeline.job).await;
    assert!(!result.is_success());

    let failed_at = position(&result.events, |e| {
        matches!(e, Event::TaskFailed { task_id, .. } if task_id.as_str() == FOM_VAL)
    })
    .unwrap();
    assert!(events_for_after(&result.events, FOM_VAL, failed_at).is_empty());

    // the failure is reported before the resources are released
    let cleanup_at = position(&result.events, |e| {
        matches!(e, Event::CleanupCompleted { .. })
    })
    .unwrap();
    assert!(failed_at < cleanup_at);
    assert!(matches!(
        result.events.last(),
        Some(Event::RunCompleted { success: false, .. })
    ));
}

#[tokio::test]
async fn test_keep_remote_leaves_siblings_running() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = small_rom(&input_dir(dir.path()));
    let injection = FailureInjection::new().fail_with(FOM_VAL, "OOM");
    let settings = fast(&pipeline).with_cleanup(CleanupPolicy::Never);
    let harness = TestHarness::with_failure_injection(injection).with_settings(settings);

    let result = harness.run(&pipeline.job).await;
    let failure = result.outcome.as_ref().err().unwrap();

    // six tasks, six buckets and the job
    assert_eq!(failure.cleanup.kept, 13);
    assert!(!failure.cleanup.is_clean());
    let live = harness.service().live_tasks();
    assert_eq!(live.len(), 6);
    assert!(live.contains(&ROM_COMPARE.to_string()));
    assert!(
        !harness
            .service()
            .calls()
            .iter()
            .any(|c| matches!(c, RemoteCall::DeleteTask(_) | RemoteCall::DeleteJob(_)))
    );
}

#[tokio::test]
async fn test_unknown_terminal_state_fails_the_run() {
    let injection = FailureInjection::new().end_in_state("b", "Exploded");
    let harness = TestHarness::with_failure_injection(injection);

    let result = harness.run(&diamond_job()).await;
    let failure = result.outcome.as_ref().err().unwrap();

    match &failure.error {
        ExecutionError::TaskFailed { task, state, .. } => {
            assert_eq!(task, &TaskId::new("b"));
            assert_eq!(state, "Exploded");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.service().task_state("c").as_deref(), Some("Cancelled"));
}

#[tokio::test]
async fn test_rejected_submission_releases_created_objects() {
    let injection = FailureInjection::new().reject_submit("b");
    let harness = TestHarness::with_failure_injection(injection);

    let result = harness.run(&diamond_job()).await;
    let failure = result.outcome.as_ref().err().unwrap();

    assert!(matches!(
        failure.error,
        ExecutionError::Remote {
            operation: "submit_task",
            ..
        }
    ));
    assert_eq!(harness.service().submission_order(), vec!["a", "b"]);
    assert_eq!(failure.cleanup.tasks_deleted, 3);
    assert!(harness.service().live_tasks().is_empty());
}

#[tokio::test]
async fn test_degenerate_timing_fails_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = small_rom(&input_dir(dir.path()));
    let injection = FailureInjection::new()
        .timings(FOM_VAL, "00:02:00", "00:01:00")
        .timings(ROM_VAL, "00:00:00", "00:00:01");
    let harness = TestHarness::with_failure_injection(injection).with_settings(fast(&pipeline));

    let result = harness.run(&pipeline.job).await;
    let failure = result.outcome.as_ref().err().unwrap();

    assert!(matches!(
        failure.error,
        ExecutionError::Report(ReportError::DegenerateTiming(_))
    ));
    // every task ran to completion and cleanup still happened
    assert_eq!(harness.recorder().finished().await.len(), 6);
    assert!(failure.cleanup.is_clean());
    assert!(harness.service().live_buckets().is_empty());
}
