//! Wait loop over submitted tasks.
//!
//! Each round visits every non-terminal task once: a bounded `wait`, a state
//! read and a read of fresh output. Rounds are separated by the poll
//! interval. The loop stops at the first task that does not succeed.

use std::future::Future;
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::types::TaskId;
use crate::events::{Event, EventBus};
use crate::remote::{BatchService, RemoteError};

use super::error::ExecutionError;
use super::settings::RunSettings;
use super::tracked::TrackedTask;

/// Polls tasks until all are terminal.
pub struct Poller {
    service: Arc<dyn BatchService>,
    settings: RunSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl Poller {
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

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }

    /// Block until every task is terminal.
    ///
    /// Returns `Ok` only when every cached state is terminal and successful.
    /// Tasks already terminal on entry are never polled again. On the first
    /// failure the remote error list is fetched and returned in
    /// [`ExecutionError::TaskFailed`]; other tasks are left as they are.
    pub async fn wait_all(&self, tasks: &mut [TrackedTask]) -> Result<(), ExecutionError> {
        let span = info_span!("poll", task_count = tasks.len());
        self.poll_loop(tasks).instrument(span).await
    }

    async fn poll_loop(&self, tasks: &mut [TrackedTask]) -> Result<(), ExecutionError> {
        let total = tasks.len();
        let started = Instant::now();
        let mut finished = tasks.iter().filter(|t| t.is_terminal()).count();
        let mut round = 0u64;

        if let Some(task) = tasks.iter().find(|t| t.is_terminal() && !t.succeeded()) {
            return Err(self.failure(task));
        }

        while finished < total {
            round += 1;
            debug!(round, finished, total, "polling round");

            for task in tasks.iter_mut().filter(|t| !t.is_terminal()) {
                self.poll_task(task).await?;
                if !task.is_terminal() {
                    continue;
                }

                finished += 1;
                info!(
                    task = %task.id(),
                    state = %task.state(),
                    "finished {}/{}",
                    finished,
                    total
                );
                self.emit(Event::task_finished(
                    task.id().clone(),
                    task.state(),
                    finished,
                    total,
                ))
                .await;

                if !task.succeeded() {
                    // the observed failure outranks a failed errors() read
                    let errors = match self
                        .call("errors", task.id(), || self.service.errors(task.handle()))
                        .await
                    {
                        Ok(errors) => errors,
                        Err(e) => {
                            warn!(task = %task.id(), error = %e, "could not read task errors");
                            vec![format!("<errors unavailable: {}>", e)]
                        }
                    };
                    task.set_errors(errors);
                    let raw_state = task.raw_state().unwrap_or_default().to_string();
                    warn!(
                        task = %task.id(),
                        raw_state = %raw_state,
                        errors = ?task.errors(),
                        "task did not succeed"
                    );
                    self.emit(Event::task_failed(
                        task.id().clone(),
                        raw_state,
                        task.errors().to_vec(),
                    ))
                    .await;
                    return Err(self.failure(task));
                }
            }

            if finished == total {
                break;
            }
            if let Some(max_wait) = self.settings.max_wait {
                let elapsed = started.elapsed();
                if elapsed >= max_wait {
                    let pending: Vec<TaskId> = tasks
                        .iter()
                        .filter(|t| !t.is_terminal())
                        .map(|t| t.id().clone())
                        .collect();
                    warn!(elapsed = ?elapsed, pending = pending.len(), "giving up waiting");
                    return Err(ExecutionError::WaitTimeout { elapsed, pending });
                }
            }
            sleep(self.settings.poll_interval).await;
        }

        debug!(rounds = round, elapsed = ?started.elapsed(), "all tasks terminal");
        Ok(())
    }

    /// One wait/state/output cycle for a single task.
    async fn poll_task(&self, task: &mut TrackedTask) -> Result<(), ExecutionError> {
        let timeout = self.settings.wait_timeout;
        let done = self
            .call("wait", task.id(), || self.service.wait(task.handle(), timeout))
            .await?;
        let raw = self
            .call("state", task.id(), || self.service.state(task.handle()))
            .await?;

        if let Some((from, to)) = task.observe(&raw, done) {
            debug!(task = %task.id(), from = %from, to = %to, raw_state = %raw, "state changed");
            self.emit(Event::task_state_changed(task.id().clone(), from, to))
                .await;
        }

        let stdout = self
            .call("fresh_stdout", task.id(), || self.service.fresh_stdout(task.handle()))
            .await?;
        let stderr = self
            .call("fresh_stderr", task.id(), || self.service.fresh_stderr(task.handle()))
            .await?;
        if !stdout.is_empty() || !stderr.is_empty() {
            self.emit(Event::task_output(task.id().clone(), stdout, stderr))
                .await;
        }
        Ok(())
    }

    /// Run a remote call, retrying transient failures with backoff.
    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        task: &TaskId,
        mut f: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let backoff = &self.settings.backoff;
        let mut failures = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && backoff.should_retry(failures + 1) => {
                    failures += 1;
                    let delay = backoff.delay_for(failures);
                    warn!(
                        operation,
                        task = %task,
                        attempt = failures,
                        delay = ?delay,
                        error = %err,
                        "transient remote failure, retrying"
                    );
                    self.emit(Event::remote_retry(
                        operation,
                        Some(task.clone()),
                        failures,
                        delay,
                        err.to_string(),
                    ))
                    .await;
                    sleep(delay).await;
                }
                Err(err) => return Err(ExecutionError::remote(operation, err)),
            }
        }
    }

    fn failure(&self, task: &TrackedTask) -> ExecutionError {
        ExecutionError::TaskFailed {
            task: task.id().clone(),
            state: task
                .raw_state()
                .map(str::to_string)
                .unwrap_or_else(|| task.state().to_string()),
            errors: task.errors().to_vec(),
            diagnostics: self.settings.diagnostics(),
        }
    }
}
