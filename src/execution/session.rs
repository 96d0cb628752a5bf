//! Bookkeeping of every remote object a run creates.
//!
//! A [`Session`] is the only way the orchestration code creates remote
//! objects, so [`Session::release`] can find and delete all of them on every
//! exit path.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::bucket::BucketSpec;
use crate::core::task::TaskSpec;
use crate::core::types::{BucketId, RunId, TaskId};
use crate::events::{Event, EventBus};
use crate::remote::{
    BatchService, BucketHandle, JobHandle, RemoteError, TaskHandle, TaskRequest,
};

use super::error::ExecutionError;
use super::settings::CleanupPolicy;

/// Outcome of releasing a session's remote objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tasks_deleted: usize,
    pub buckets_deleted: usize,
    pub job_deleted: bool,
    /// Objects left on the service because of [`CleanupPolicy::Never`].
    pub kept: usize,
    /// Deletions that failed, as `"<object>: <error>"`.
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.kept == 0
    }
}

/// Remote objects created during one run.
pub struct Session {
    run_id: RunId,
    service: Arc<dyn BatchService>,
    event_bus: Option<Arc<EventBus>>,
    job: Option<JobHandle>,
    buckets: Vec<(BucketId, BucketHandle)>,
    tasks: Vec<(TaskId, TaskHandle)>,
    sealed: HashSet<BucketId>,
    released: bool,
}

impl Session {
    pub fn new(service: Arc<dyn BatchService>) -> Self {
        Self {
            run_id: RunId::new(),
            service,
            event_bus: None,
            job: None,
            buckets: Vec::new(),
            tasks: Vec::new(),
            sealed: HashSet::new(),
            released: false,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn service(&self) -> &Arc<dyn BatchService> {
        &self.service
    }

    pub fn job(&self) -> Option<&JobHandle> {
        self.job.as_ref()
    }

    pub fn bucket(&self, id: &BucketId) -> Option<&BucketHandle> {
        self.buckets.iter().find(|(b, _)| b == id).map(|(_, h)| h)
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskHandle> {
        self.tasks.iter().find(|(t, _)| t == id).map(|(_, h)| h)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_sealed(&self, id: &BucketId) -> bool {
        self.sealed.contains(id)
    }

    /// Create a bucket and stage its declared inputs.
    pub async fn create_bucket(&mut self, spec: &BucketSpec) -> Result<BucketHandle, ExecutionError> {
        let handle = self
            .service
            .create_bucket(spec.id.as_str())
            .await
            .map_err(|e| ExecutionError::remote("create_bucket", e))?;
        debug!(bucket = %spec.id, handle = %handle, "created bucket");
        self.buckets.push((spec.id.clone(), handle.clone()));

        if let Some(dir) = &spec.sync_dir {
            self.sync_directory(&spec.id, dir).await?;
        }
        for file in &spec.files {
            self.add_file(&spec.id, file).await?;
        }
        Ok(handle)
    }

    /// Mirror a local directory into an unsealed bucket.
    pub async fn sync_directory(&self, bucket: &BucketId, dir: &Path) -> Result<(), ExecutionError> {
        let handle = self.writable_bucket(bucket)?;
        self.service
            .sync_directory(handle, dir)
            .await
            .map_err(|e| ExecutionError::remote("sync_directory", e))?;
        debug!(bucket = %bucket, dir = %dir.display(), "synchronized directory");
        Ok(())
    }

    /// Upload a file into an unsealed bucket.
    pub async fn add_file(&self, bucket: &BucketId, file: &Path) -> Result<(), ExecutionError> {
        let handle = self.writable_bucket(bucket)?;
        self.service
            .add_file(handle, file)
            .await
            .map_err(|e| ExecutionError::remote("add_file", e))?;
        debug!(bucket = %bucket, file = %file.display(), "uploaded file");
        Ok(())
    }

    fn writable_bucket(&self, id: &BucketId) -> Result<&BucketHandle, ExecutionError> {
        if self.sealed.contains(id) {
            return Err(ExecutionError::BucketSealed(id.clone()));
        }
        self.bucket(id).ok_or_else(|| ExecutionError::UnknownHandle {
            kind: "bucket",
            name: id.to_string(),
        })
    }

    /// Create and submit the remote job tasks are attached to.
    pub async fn open_job(&mut self, name: &str, use_dependencies: bool) -> Result<JobHandle, ExecutionError> {
        let handle = self
            .service
            .create_job(name, use_dependencies)
            .await
            .map_err(|e| ExecutionError::remote("create_job", e))?;
        self.job = Some(handle.clone());
        self.service
            .submit_job(&handle)
            .await
            .map_err(|e| ExecutionError::remote("submit_job", e))?;
        debug!(job = %handle, use_dependencies, "submitted job");
        Ok(handle)
    }

    /// Create a task in the session's job, resolving its buckets.
    pub async fn create_task(&mut self, spec: &TaskSpec) -> Result<TaskHandle, ExecutionError> {
        let resources = spec
            .resources
            .iter()
            .map(|id| self.resolve_bucket(id))
            .collect::<Result<Vec<_>, _>>()?;
        let results = spec
            .results
            .as_ref()
            .map(|id| self.resolve_bucket(id))
            .transpose()?;

        let request = TaskRequest {
            name: spec.id.to_string(),
            profile: spec.profile.clone(),
            instance_count: spec.instance_count,
            job: self.job.clone(),
            constants: spec.constants.clone(),
            resources,
            results,
            results_whitelist: spec.results_whitelist.clone(),
        };
        let handle = self
            .service
            .create_task(request)
            .await
            .map_err(|e| ExecutionError::remote("create_task", e))?;
        debug!(task = %spec.id, handle = %handle, "created task");
        self.tasks.push((spec.id.clone(), handle.clone()));
        Ok(handle)
    }

    fn resolve_bucket(&self, id: &BucketId) -> Result<BucketHandle, ExecutionError> {
        self.bucket(id).cloned().ok_or_else(|| ExecutionError::UnknownHandle {
            kind: "bucket",
            name: id.to_string(),
        })
    }

    /// Forbid further changes to the given buckets.
    pub fn seal<'a>(&mut self, buckets: impl IntoIterator<Item = &'a BucketId>) {
        for id in buckets {
            if self.sealed.insert(id.clone()) {
                debug!(bucket = %id, "sealed bucket");
            }
        }
    }

    /// Delete everything this session created, tasks first.
    ///
    /// Deleting a task cancels it if it is still running. Failures are
    /// logged and collected; release never fails. Calling it twice is a
    /// no-op.
    pub async fn release(&mut self, policy: CleanupPolicy) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.released {
            return report;
        }
        self.released = true;

        if policy == CleanupPolicy::Never {
            report.kept = self.tasks.len() + self.buckets.len() + usize::from(self.job.is_some());
            if report.kept > 0 {
                warn!(
                    run = %self.run_id,
                    tasks = self.tasks.len(),
                    buckets = self.buckets.len(),
                    "leaving remote resources in place; unfinished tasks keep running"
                );
            }
            return report;
        }

        for (id, handle) in self.tasks.iter().rev() {
            match self.service.delete_task(handle, true, true).await {
                Ok(()) => report.tasks_deleted += 1,
                Err(e) => record_failure(&mut report, "task", id.as_str(), e),
            }
        }
        for (id, handle) in &self.buckets {
            // purged along with the tasks mounting it, most of the time
            match self.service.delete_bucket(handle).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => report.buckets_deleted += 1,
                Err(e) => record_failure(&mut report, "bucket", id.as_str(), e),
            }
        }
        if let Some(job) = &self.job {
            match self.service.delete_job(job).await {
                Ok(()) => report.job_deleted = true,
                Err(e) => record_failure(&mut report, "job", job.name(), e),
            }
        }

        info!(
            run = %self.run_id,
            tasks_deleted = report.tasks_deleted,
            buckets_deleted = report.buckets_deleted,
            failures = report.failures.len(),
            "released remote resources"
        );
        if let Some(bus) = &self.event_bus {
            bus.emit(Event::cleanup_completed(
                self.run_id,
                report.tasks_deleted,
                report.buckets_deleted,
                report.failures.len(),
            ))
            .await;
        }
        report
    }
}

fn record_failure(report: &mut CleanupReport, kind: &str, name: &str, error: RemoteError) {
    warn!(kind, name, error = %error, "failed to delete remote object");
    report.failures.push(format!("{} '{}': {}", kind, name, error));
}
