//! Local cache of a submitted task's remote state.

use std::path::PathBuf;
use tracing::debug;

use crate::core::task::TaskState;
use crate::core::types::TaskId;
use crate::remote::TaskHandle;

/// A task created on the service, with the last state observed for it.
///
/// The cached state only moves forward. Once terminal it is frozen:
/// further observations change neither the state nor the diagnostics.
#[derive(Debug, Clone)]
pub struct TrackedTask {
    id: TaskId,
    handle: TaskHandle,
    instance_count: u32,
    state: TaskState,
    raw_state: Option<String>,
    errors: Vec<String>,
    download_to: Option<PathBuf>,
}

impl TrackedTask {
    pub fn new(id: TaskId, handle: TaskHandle, instance_count: u32) -> Self {
        Self {
            id,
            handle,
            instance_count,
            state: TaskState::Pending,
            raw_state: None,
            errors: Vec::new(),
            download_to: None,
        }
    }

    pub fn with_download_to(mut self, path: Option<PathBuf>) -> Self {
        self.download_to = path;
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Last raw state name reported by the service.
    pub fn raw_state(&self) -> Option<&str> {
        self.raw_state.as_deref()
    }

    /// Errors reported by the service once the task failed.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn download_to(&self) -> Option<&PathBuf> {
        self.download_to.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Only a raw `Success` counts as success.
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Success
    }

    /// Record that the task was handed to the scheduler.
    pub(crate) fn mark_submitted(&mut self) -> Option<(TaskState, TaskState)> {
        self.advance(TaskState::Submitted)
    }

    /// Fold a remote observation into the cache.
    ///
    /// `finished` is the result of the last bounded `wait`. A task the service
    /// reports as finished whose raw state is not a known failure name is
    /// treated as failed. Returns the transition, if any.
    pub(crate) fn observe(&mut self, raw: &str, finished: bool) -> Option<(TaskState, TaskState)> {
        if self.is_terminal() {
            return None;
        }
        self.raw_state = Some(raw.to_string());

        let mapped = TaskState::from_remote(raw);
        let next = match mapped {
            _ if raw == "Success" => TaskState::Success,
            Some(state @ (TaskState::Failure | TaskState::Cancelled)) => state,
            Some(state) if !finished => state,
            Some(_) => TaskState::Failure,
            None if finished => TaskState::Failure,
            None => {
                debug!(task = %self.id, raw_state = raw, "ignoring unknown remote state");
                return None;
            }
        };
        self.advance(next)
    }

    pub(crate) fn set_errors(&mut self, errors: Vec<String>) {
        self.errors = errors;
    }

    fn advance(&mut self, next: TaskState) -> Option<(TaskState, TaskState)> {
        if !self.state.can_advance_to(next) {
            return None;
        }
        let from = self.state;
        self.state = next;
        Some((from, next))
    }
}
