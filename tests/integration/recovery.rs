//! Recovery tests.
//!
//! Transient outages of the service are retried with backoff, polling can be
//! resumed safely and an overall deadline bounds the wait.

use batchpipe::remote::RemoteCall;
use batchpipe::testing::TestHarness;
use batchpipe::{
    BackoffPolicy, CleanupPolicy, Event, ExecutionError, FailureInjection, JobBuilder, Poller,
    RunSettings, Session, SimulatedBatchService, Submitter, TaskId, TaskSpec,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::diamond_job;

#[tokio::test]
async fn test_outage_is_retried_until_the_service_answers() {
    let injection = FailureInjection::new().unavailable_for(3);
    let harness = TestHarness::with_failure_injection(injection);

    let result = harness.run(&diamond_job()).await;

    assert!(result.is_success());
    let attempts: Vec<(&str, u32)> = result
        .events
        .iter()
        .filter_map(|e| match e {
            Event::RemoteRetry {
                operation, attempt, ..
            } => Some((*operation, *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![("wait", 1), ("wait", 2), ("wait", 3)]);
}

#[tokio::test]
async fn test_outage_beyond_budget_fails_and_releases() {
    let injection = FailureInjection::new().unavailable_for(4);
    let harness = TestHarness::with_failure_injection(injection);

    let result = harness.run(&diamond_job()).await;
    let failure = result.outcome.as_ref().err().unwrap();

    assert!(matches!(
        failure.error,
        ExecutionError::Remote {
            operation: "wait",
            ..
        }
    ));
    let retries = result
        .events
        .iter()
        .filter(|e| matches!(e, Event::RemoteRetry { .. }))
        .count();
    assert_eq!(retries, 3);
    assert_eq!(failure.cleanup.tasks_deleted, 3);
    assert!(harness.service().live_tasks().is_empty());
}

#[tokio::test]
async fn test_outage_is_fatal_without_retries() {
    let settings = RunSettings::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::ZERO)
        .with_backoff(BackoffPolicy::none());
    let injection = FailureInjection::new().unavailable_for(1);
    let harness = TestHarness::with_failure_injection(injection).with_settings(settings);

    let result = harness.run(&diamond_job()).await;

    // without retries the very first status call is fatal
    assert!(!result.is_success());
    assert!(
        !result
            .events
            .iter()
            .any(|e| matches!(e, Event::RemoteRetry { .. }))
    );
}

#[tokio::test]
async fn test_repeated_wait_does_not_poll_finished_tasks() {
    let service = Arc::new(SimulatedBatchService::new());
    let job = diamond_job();
    let settings = RunSettings::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::ZERO);

    let mut session = Session::new(service.clone());
    let mut tasks = Submitter::new().submit_all(&mut session, &job).await.unwrap();
    let poller = Poller::new(service.clone(), settings);

    poller.wait_all(&mut tasks).await.unwrap();
    let calls_after_first = service.calls().len();
    poller.wait_all(&mut tasks).await.unwrap();

    assert_eq!(service.calls().len(), calls_after_first);
    assert!(tasks.iter().all(|t| t.succeeded()));

    let report = session.release(CleanupPolicy::Always).await;
    assert_eq!(report.tasks_deleted, 3);
    assert!(
        service
            .calls()
            .iter()
            .any(|c| matches!(c, RemoteCall::DeleteJob(name) if name == "Diamond"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_the_wait() {
    let injection = FailureInjection::new().run_steps("slow", 1_000);
    let harness = TestHarness::with_failure_injection(injection).with_settings(
        RunSettings::default()
            .with_poll_interval(Duration::from_secs(1))
            .with_wait_timeout(Duration::ZERO)
            .with_max_wait(Duration::from_secs(10)),
    );
    let job = JobBuilder::new("deadline", "Deadline")
        .task(TaskSpec::new("quick"))
        .task(TaskSpec::new("slow"))
        .build()
        .unwrap();

    let result = harness.run(&job).await;
    let failure = result.outcome.as_ref().err().unwrap();

    match &failure.error {
        ExecutionError::WaitTimeout { elapsed, pending } => {
            assert!(*elapsed >= Duration::from_secs(10));
            assert_eq!(pending, &vec![TaskId::new("slow")]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(harness.service().wait_count("slow") < 20);
    assert_eq!(harness.service().task_state("slow").as_deref(), Some("Cancelled"));
}
