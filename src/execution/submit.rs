//! Job submission.
//!
//! Turns a validated [`Job`] into remote objects: buckets are created and
//! staged, the remote job is opened, every task is created and wired to its
//! predecessors, then tasks are submitted in insertion order.

use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};

use crate::core::job::Job;
use crate::events::{Event, EventBus};

use super::error::ExecutionError;
use super::session::Session;
use super::tracked::TrackedTask;

/// Submits every task of a job through a [`Session`].
pub struct Submitter {
    event_bus: Option<Arc<EventBus>>,
}

impl Submitter {
    pub fn new() -> Self {
        Self { event_bus: None }
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

    /// Submit the whole job.
    ///
    /// The job is validated locally first; an invalid job fails before any
    /// remote call. Returns one [`TrackedTask`] per task, in insertion order,
    /// each in state `Submitted`. Objects created before a failure stay
    /// recorded in `session` for release.
    pub async fn submit_all(
        &self,
        session: &mut Session,
        job: &Job,
    ) -> Result<Vec<TrackedTask>, ExecutionError> {
        job.validate()?;

        let span = info_span!(
            "submit",
            job = %job.id(),
            run = %session.run_id(),
            task_count = job.tasks().len(),
        );
        self.submit_validated(session, job).instrument(span).await
    }

    async fn submit_validated(
        &self,
        session: &mut Session,
        job: &Job,
    ) -> Result<Vec<TrackedTask>, ExecutionError> {
        for bucket in job.buckets() {
            session.create_bucket(bucket).await?;
        }

        session.open_job(job.name(), job.uses_dependencies()).await?;

        let mut tracked = Vec::with_capacity(job.tasks().len());
        for spec in job.tasks() {
            let handle = session.create_task(spec).await?;
            tracked.push(
                TrackedTask::new(spec.id.clone(), handle, spec.instance_count)
                    .with_download_to(spec.download_to.clone()),
            );
        }

        for (spec, task) in job.tasks().iter().zip(tracked.iter_mut()) {
            let predecessors = job.graph().get_dependencies(&spec.id).unwrap_or_default();
            if !predecessors.is_empty() {
                let handles = predecessors
                    .iter()
                    .map(|p| {
                        session.task(p).cloned().ok_or_else(|| ExecutionError::UnknownHandle {
                            kind: "task",
                            name: p.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                session
                    .service()
                    .set_task_dependencies(task.handle(), &handles)
                    .await
                    .map_err(|e| ExecutionError::remote("set_task_dependencies", e))?;
                debug!(task = %spec.id, predecessors = ?predecessors, "declared dependencies");
            }

            session.seal(spec.buckets());
            session
                .service()
                .submit_task(task.handle())
                .await
                .map_err(|e| ExecutionError::remote("submit_task", e))?;
            if let Some((from, to)) = task.mark_submitted() {
                self.emit(Event::task_state_changed(spec.id.clone(), from, to))
                    .await;
            }
            info!(task = %spec.id, instances = spec.instance_count, "submitted task");
            self.emit(Event::task_submitted(spec.id.clone(), predecessors.to_vec()))
                .await;
        }

        self.emit(Event::job_submitted(
            job.id().clone(),
            session.run_id(),
            tracked.len(),
        ))
        .await;
        Ok(tracked)
    }
}

impl Default for Submitter {
    fn default() -> Self {
        Self::new()
    }
}
