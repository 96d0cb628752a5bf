//! Interface to the remote batch computing service.
//!
//! The orchestration code only talks to the service through [`BatchService`].
//! Handles returned by the service are opaque; the local [`TaskId`] and
//! [`BucketId`] names are kept alongside for logging.
//!
//! [`TaskId`]: crate::core::types::TaskId
//! [`BucketId`]: crate::core::types::BucketId

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{FailureInjection, RemoteCall, SimulatedBatchService};

/// Errors returned by the remote service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service could not be reached; the call may succeed later.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The referenced object does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service refused the request.
    #[error("rejected by service: {0}")]
    Rejected(String),

    /// Reading or writing local files failed.
    #[error("local I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// Check if this error is transient (should be retried with backoff).
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            uuid: Uuid,
            name: String,
        }

        impl $name {
            pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
                Self {
                    uuid,
                    name: name.into(),
                }
            }

            pub fn uuid(&self) -> &Uuid {
                &self.uuid
            }

            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} ({})", self.name, self.uuid)
            }
        }
    };
}

handle!(
    /// Remote bucket handle.
    BucketHandle
);
handle!(
    /// Remote job handle.
    JobHandle
);
handle!(
    /// Remote task handle.
    TaskHandle
);

/// Everything the service needs to create a task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub name: String,
    pub profile: String,
    pub instance_count: u32,
    pub job: Option<JobHandle>,
    pub constants: BTreeMap<String, String>,
    pub resources: Vec<BucketHandle>,
    pub results: Option<BucketHandle>,
    pub results_whitelist: Option<String>,
}

/// A remote batch execution service.
///
/// Task states are returned raw: the service may report names outside the
/// local lifecycle, and callers decide how to treat them.
#[async_trait]
pub trait BatchService: Send + Sync {
    /// Create an empty bucket.
    async fn create_bucket(&self, name: &str) -> Result<BucketHandle, RemoteError>;

    /// Mirror a local directory into a bucket.
    async fn sync_directory(&self, bucket: &BucketHandle, local: &Path)
    -> Result<(), RemoteError>;

    /// Upload one local file into a bucket.
    async fn add_file(&self, bucket: &BucketHandle, local: &Path) -> Result<(), RemoteError>;

    /// Delete a bucket and its contents.
    async fn delete_bucket(&self, bucket: &BucketHandle) -> Result<(), RemoteError>;

    /// Create a job grouping tasks.
    async fn create_job(&self, name: &str, use_dependencies: bool)
    -> Result<JobHandle, RemoteError>;

    /// Submit a job so tasks can be attached and scheduled.
    async fn submit_job(&self, job: &JobHandle) -> Result<(), RemoteError>;

    /// Delete a job.
    async fn delete_job(&self, job: &JobHandle) -> Result<(), RemoteError>;

    /// Create a task. The task is not scheduled until submitted.
    async fn create_task(&self, request: TaskRequest) -> Result<TaskHandle, RemoteError>;

    /// Make `task` wait on every task in `predecessors`.
    async fn set_task_dependencies(
        &self,
        task: &TaskHandle,
        predecessors: &[TaskHandle],
    ) -> Result<(), RemoteError>;

    /// Hand a task to the remote scheduler.
    async fn submit_task(&self, task: &TaskHandle) -> Result<(), RemoteError>;

    /// Wait up to `timeout` for the task to finish; true if it is terminal.
    async fn wait(&self, task: &TaskHandle, timeout: Duration) -> Result<bool, RemoteError>;

    /// Raw state name of the task.
    async fn state(&self, task: &TaskHandle) -> Result<String, RemoteError>;

    /// Errors reported by the task's instances.
    async fn errors(&self, task: &TaskHandle) -> Result<Vec<String>, RemoteError>;

    /// Cumulated execution time, formatted `HH:MM:SS`.
    async fn execution_time(&self, task: &TaskHandle) -> Result<String, RemoteError>;

    /// Wall-clock time between start and end, formatted `HH:MM:SS`.
    async fn wall_time(&self, task: &TaskHandle) -> Result<String, RemoteError>;

    /// Standard output produced since the previous call.
    async fn fresh_stdout(&self, _task: &TaskHandle) -> Result<String, RemoteError> {
        Ok(String::new())
    }

    /// Standard error produced since the previous call.
    async fn fresh_stderr(&self, _task: &TaskHandle) -> Result<String, RemoteError> {
        Ok(String::new())
    }

    /// Download the task's result bucket into a local directory.
    async fn download_results(&self, task: &TaskHandle, local: &Path)
    -> Result<(), RemoteError>;

    /// Delete a task, cancelling it if it is still running.
    async fn delete_task(
        &self,
        task: &TaskHandle,
        purge_resources: bool,
        purge_results: bool,
    ) -> Result<(), RemoteError>;
}
