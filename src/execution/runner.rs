//! End-to-end pipeline run with guaranteed release.
//!
//! [`PipelineRunner::run`] submits a job, waits for it, downloads results,
//! collects timings and then always releases the session, whatever step
//! failed.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span};

use crate::core::job::Job;
use crate::core::types::RunId;
use crate::events::{Event, EventBus};
use crate::remote::BatchService;
use crate::report::ExecutionReport;

use super::error::ExecutionError;
use super::poller::Poller;
use super::session::{CleanupReport, Session};
use super::settings::RunSettings;
use super::submit::Submitter;
use super::tracked::TrackedTask;

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// Final cached state of every task, in insertion order.
    pub tasks: Vec<TrackedTask>,
    pub report: ExecutionReport,
    pub cleanup: CleanupReport,
    pub duration: Duration,
}

/// A failed run, with what the release step did afterwards.
#[derive(Debug)]
pub struct RunFailure {
    pub run_id: RunId,
    pub error: ExecutionError,
    pub cleanup: CleanupReport,
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Runs jobs against a batch service.
pub struct PipelineRunner {
    service: Arc<dyn BatchService>,
    settings: RunSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl PipelineRunner {
    pub fn new(service: Arc<dyn BatchService>, settings: RunSettings) -> Self {
        Self {
            service,
            settings,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run a job to completion.
    ///
    /// The session is released on success and on every error path; a
    /// release problem is reported in the cleanup report and never replaces
    /// the run's own error.
    pub async fn run(&self, job: &Job) -> Result<RunOutcome, RunFailure> {
        let mut session = Session::new(self.service.clone());
        if let Some(bus) = &self.event_bus {
            session = session.with_event_bus(bus.clone());
        }
        let run_id = session.run_id();
        let span = info_span!("pipeline_run", job = %job.id(), run = %run_id);

        async {
            let started = Instant::now();
            info!(tasks = job.tasks().len(), buckets = job.buckets().len(), "starting run");

            let result = self.drive(&mut session, job).await;
            let cleanup = session.release(self.settings.cleanup).await;
            let duration = started.elapsed();

            if let Some(bus) = &self.event_bus {
                bus.emit(Event::run_completed(
                    job.id().clone(),
                    run_id,
                    result.is_ok(),
                    duration,
                ))
                .await;
            }

            match result {
                Ok((tasks, report)) => {
                    info!(duration = ?duration, "run succeeded");
                    Ok(RunOutcome {
                        run_id,
                        tasks,
                        report,
                        cleanup,
                        duration,
                    })
                }
                Err(error) => {
                    error!(error = %error, duration = ?duration, "run failed");
                    Err(RunFailure {
                        run_id,
                        error,
                        cleanup,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        session: &mut Session,
        job: &Job,
    ) -> Result<(Vec<TrackedTask>, ExecutionReport), ExecutionError> {
        let mut submitter = Submitter::new();
        let mut poller = Poller::new(self.service.clone(), self.settings.clone());
        if let Some(bus) = &self.event_bus {
            submitter = submitter.with_event_bus(bus.clone());
            poller = poller.with_event_bus(bus.clone());
        }

        let mut tasks = submitter.submit_all(session, job).await?;
        poller.wait_all(&mut tasks).await?;

        for task in &tasks {
            if let Some(dir) = task.download_to() {
                self.service
                    .download_results(task.handle(), dir)
                    .await
                    .map_err(|e| ExecutionError::remote("download_results", e))?;
                info!(task = %task.id(), dir = %dir.display(), "downloaded results");
            }
        }

        let report =
            ExecutionReport::collect(self.service.as_ref(), &tasks, &self.settings.report).await?;
        Ok((tasks, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bucket::BucketSpec;
    use crate::core::job::JobBuilder;
    use crate::core::retry::BackoffPolicy;
    use crate::core::task::{TaskSpec, TaskState};
    use crate::execution::CleanupPolicy;
    use crate::remote::{FailureInjection, SimulatedBatchService};
    use crate::report::ReportSettings;

    fn settings() -> RunSettings {
        RunSettings::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_backoff(BackoffPolicy::none())
    }

    fn job() -> Job {
        JobBuilder::new("pair", "Pair")
            .bucket(BucketSpec::new("results"))
            .task(TaskSpec::new("slow").with_instances(4).with_results("results"))
            .task(TaskSpec::new("fast"))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_releases_everything() {
        let injection = FailureInjection::new()
            .timings("slow", "00:02:00", "00:00:40")
            .timings("fast", "00:00:10", "00:00:10");
        let service = Arc::new(SimulatedBatchService::with_injection(injection));
        let runner = PipelineRunner::new(
            service.clone(),
            settings().with_report(ReportSettings::default().with_speedup("slow", "fast")),
        );

        let outcome = runner.run(&job()).await.unwrap();

        assert!(outcome.tasks.iter().all(|t| t.state() == TaskState::Success));
        assert_eq!(outcome.report.speedup.as_ref().unwrap().ratio, 12.0);
        assert_eq!(outcome.cleanup.tasks_deleted, 2);
        assert!(outcome.cleanup.is_clean());
        assert!(service.live_tasks().is_empty());
        assert!(service.live_buckets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_still_releases() {
        let injection = FailureInjection::new().fail_with("fast", "segfault");
        let service = Arc::new(SimulatedBatchService::with_injection(injection));
        let runner = PipelineRunner::new(service.clone(), settings());

        let failure = runner.run(&job()).await.unwrap_err();

        assert!(matches!(failure.error, ExecutionError::TaskFailed { .. }));
        assert_eq!(failure.cleanup.tasks_deleted, 2);
        assert!(service.live_tasks().is_empty());
        assert!(service.live_buckets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_remote_leaves_resources() {
        let service = Arc::new(SimulatedBatchService::new());
        let runner =
            PipelineRunner::new(service.clone(), settings().with_cleanup(CleanupPolicy::Never));

        let outcome = runner.run(&job()).await.unwrap();

        assert_eq!(outcome.cleanup.kept, 4);
        assert_eq!(service.live_tasks(), vec!["fast", "slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_results() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("slow");
        let job = JobBuilder::new("dl", "Download")
            .bucket(BucketSpec::new("results"))
            .task(
                TaskSpec::new("slow")
                    .with_instances(2)
                    .with_results("results")
                    .with_download_to(&target),
            )
            .build()
            .unwrap();
        let service = Arc::new(SimulatedBatchService::new());

        PipelineRunner::new(service, settings())
            .run(&job)
            .await
            .unwrap();

        assert!(target.join("slow-0.out").exists());
        assert!(target.join("slow-1.out").exists());
    }
}
