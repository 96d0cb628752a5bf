//! Testing utilities for users of the batchpipe library.
//!
//! This module provides helpers for testing pipelines without a real
//! service:
//!
//! - [`RecordingHandler`]: An event handler that keeps every event
//! - [`TestHarness`]: Runs jobs against the simulated service with fast
//!   polling and records the events of the run

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::job::Job;
use crate::core::retry::BackoffPolicy;
use crate::core::types::TaskId;
use crate::events::{Event, EventBus, EventHandler};
use crate::execution::{PipelineRunner, RunFailure, RunOutcome, RunSettings};
use crate::remote::{FailureInjection, SimulatedBatchService};

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event received so far, in order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Tasks in the order they were reported submitted.
    pub async fn submitted(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskSubmitted { task_id, .. } => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tasks in the order they were reported finished.
    pub async fn finished(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskFinished { task_id, .. } => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of events concerning `task`.
    pub async fn count_for(&self, task: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id().is_some_and(|t| t.as_str() == task))
            .count()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// A test harness running jobs on the simulated service.
///
/// Polling is fast (1ms rounds, a few 1ms retries) so whole pipelines finish
/// quickly, and under a paused tokio clock instantly.
///
/// # Example
///
/// ```no_run
/// use batchpipe::core::job::JobBuilder;
/// use batchpipe::core::task::TaskSpec;
/// use batchpipe::testing::TestHarness;
///
/// # async fn example() {
/// let job = JobBuilder::new("demo", "Demo")
///     .task(TaskSpec::new("hello"))
///     .build()
///     .unwrap();
///
/// let harness = TestHarness::new();
/// let result = harness.run(&job).await;
/// assert!(result.outcome.is_ok());
/// # }
/// ```
pub struct TestHarness {
    service: Arc<SimulatedBatchService>,
    settings: RunSettings,
    recorder: Arc<RecordingHandler>,
}

/// Result from TestHarness execution.
pub struct TestResult {
    /// What the runner returned.
    pub outcome: Result<RunOutcome, RunFailure>,
    /// Events emitted during the run.
    pub events: Vec<Event>,
}

impl TestResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl TestHarness {
    /// Create a harness where every task succeeds.
    pub fn new() -> Self {
        Self::with_service(SimulatedBatchService::new())
    }

    /// Create a harness with scripted service behaviour.
    pub fn with_failure_injection(injection: FailureInjection) -> Self {
        Self::with_service(SimulatedBatchService::with_injection(injection))
    }

    fn with_service(service: SimulatedBatchService) -> Self {
        Self {
            service: Arc::new(service),
            settings: RunSettings::default()
                .with_poll_interval(Duration::from_millis(1))
                .with_wait_timeout(Duration::ZERO)
                .with_backoff(BackoffPolicy::fixed(3, Duration::from_millis(1))),
            recorder: Arc::new(RecordingHandler::new()),
        }
    }

    /// Replace the run settings.
    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The simulated service, for inspecting calls and remote state.
    pub fn service(&self) -> &Arc<SimulatedBatchService> {
        &self.service
    }

    pub fn recorder(&self) -> &Arc<RecordingHandler> {
        &self.recorder
    }

    /// Run a job and collect the events it produced.
    pub async fn run(&self, job: &Job) -> TestResult {
        self.recorder.clear().await;
        let bus = Arc::new(EventBus::new());
        bus.register(self.recorder.clone()).await;

        let runner = PipelineRunner::new(self.service.clone(), self.settings.clone())
            .with_event_bus(bus);
        let outcome = runner.run(job).await;

        TestResult {
            outcome,
            events: self.recorder.events().await,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
