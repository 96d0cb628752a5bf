//! Errors raised while submitting, polling and reporting on a run.

use std::time::Duration;
use thiserror::Error;

use crate::core::dag::DagError;
use crate::core::job::JobError;
use crate::core::types::{BucketId, TaskId};
use crate::remote::RemoteError;
use crate::report::ReportError;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The job failed local validation; nothing was sent to the service.
    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),

    /// A remote call failed for good.
    #[error("remote call '{operation}' failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    /// A task reached a terminal state other than `Success`.
    #[error("task '{task}' ended in state '{state}': [{}]. {diagnostics}", .errors.join("; "))]
    TaskFailed {
        task: TaskId,
        state: String,
        errors: Vec<String>,
        diagnostics: String,
    },

    /// A bucket was modified after a task mounting it was submitted.
    #[error("bucket '{0}' is mounted by a submitted task and can no longer be modified")]
    BucketSealed(BucketId),

    /// A bucket or task was used before being created in this session.
    #[error("unknown {kind} '{name}' in this session")]
    UnknownHandle { kind: &'static str, name: String },

    /// Tasks were still running when the overall deadline passed.
    #[error("{} task(s) still running after {elapsed:?}: {}", .pending.len(), .pending.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", "))]
    WaitTimeout {
        elapsed: Duration,
        pending: Vec<TaskId>,
    },

    /// Reporting on the finished run failed.
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl ExecutionError {
    pub(crate) fn remote(operation: &'static str, source: RemoteError) -> Self {
        ExecutionError::Remote { operation, source }
    }

    /// Whether the error is a dependency cycle caught before submission.
    pub fn is_cyclic_dependency(&self) -> bool {
        matches!(
            self,
            ExecutionError::InvalidJob(JobError::Dag(DagError::CyclicDependency { .. }))
        )
    }

    /// The remote error list carried by a task failure.
    pub fn task_errors(&self) -> Option<&[String]> {
        match self {
            ExecutionError::TaskFailed { errors, .. } => Some(errors),
            _ => None,
        }
    }
}
