//! Lifecycle events and event handling.
//!
//! This module provides event emission for submission, polling and cleanup,
//! enabling observability into a pipeline run without coupling the
//! orchestration code to any output format.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::task::TaskState;
use crate::core::types::{JobId, RunId, TaskId};

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone)]
pub enum Event {
    /// The job and all its tasks were handed to the service.
    JobSubmitted {
        job_id: JobId,
        run_id: RunId,
        task_count: usize,
        timestamp: Instant,
    },

    /// A task was submitted.
    TaskSubmitted {
        task_id: TaskId,
        predecessors: Vec<TaskId>,
        timestamp: Instant,
    },

    /// The cached state of a task moved forward.
    TaskStateChanged {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        timestamp: Instant,
    },

    /// Fresh output read from a task.
    TaskOutput {
        task_id: TaskId,
        stdout: String,
        stderr: String,
        timestamp: Instant,
    },

    /// A task reached a terminal state.
    ///
    /// `finished` counts the terminal tasks of the watch set so far,
    /// this one included.
    TaskFinished {
        task_id: TaskId,
        state: TaskState,
        finished: usize,
        total: usize,
        timestamp: Instant,
    },

    /// A task ended in a state other than `Success`.
    TaskFailed {
        task_id: TaskId,
        raw_state: String,
        errors: Vec<String>,
        timestamp: Instant,
    },

    /// A remote call failed transiently and is being retried.
    ///
    /// Emitted immediately before the backoff delay.
    RemoteRetry {
        operation: &'static str,
        task_id: Option<TaskId>,
        /// The attempt that just failed (1-indexed).
        attempt: u32,
        delay: Duration,
        error: String,
        timestamp: Instant,
    },

    /// Remote resources created by the run were released.
    CleanupCompleted {
        run_id: RunId,
        tasks_deleted: usize,
        buckets_deleted: usize,
        failures: usize,
        timestamp: Instant,
    },

    /// The run ended, successfully or not.
    RunCompleted {
        job_id: JobId,
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobSubmitted { timestamp, .. } => *timestamp,
            Event::TaskSubmitted { timestamp, .. } => *timestamp,
            Event::TaskStateChanged { timestamp, .. } => *timestamp,
            Event::TaskOutput { timestamp, .. } => *timestamp,
            Event::TaskFinished { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::RemoteRetry { timestamp, .. } => *timestamp,
            Event::CleanupCompleted { timestamp, .. } => *timestamp,
            Event::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskSubmitted { task_id, .. }
            | Event::TaskStateChanged { task_id, .. }
            | Event::TaskOutput { task_id, .. }
            | Event::TaskFinished { task_id, .. }
            | Event::TaskFailed { task_id, .. } => Some(task_id),
            Event::RemoteRetry { task_id, .. } => task_id.as_ref(),
            _ => None,
        }
    }

    pub fn job_submitted(job_id: JobId, run_id: RunId, task_count: usize) -> Self {
        Event::JobSubmitted {
            job_id,
            run_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    pub fn task_submitted(task_id: TaskId, predecessors: Vec<TaskId>) -> Self {
        Event::TaskSubmitted {
            task_id,
            predecessors,
            timestamp: Instant::now(),
        }
    }

    pub fn task_state_changed(task_id: TaskId, from: TaskState, to: TaskState) -> Self {
        Event::TaskStateChanged {
            task_id,
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn task_output(task_id: TaskId, stdout: String, stderr: String) -> Self {
        Event::TaskOutput {
            task_id,
            stdout,
            stderr,
            timestamp: Instant::now(),
        }
    }

    pub fn task_finished(task_id: TaskId, state: TaskState, finished: usize, total: usize) -> Self {
        Event::TaskFinished {
            task_id,
            state,
            finished,
            total,
            timestamp: Instant::now(),
        }
    }

    pub fn task_failed(task_id: TaskId, raw_state: String, errors: Vec<String>) -> Self {
        Event::TaskFailed {
            task_id,
            raw_state,
            errors,
            timestamp: Instant::now(),
        }
    }

    pub fn remote_retry(
        operation: &'static str,
        task_id: Option<TaskId>,
        attempt: u32,
        delay: Duration,
        error: String,
    ) -> Self {
        Event::RemoteRetry {
            operation,
            task_id,
            attempt,
            delay,
            error,
            timestamp: Instant::now(),
        }
    }

    pub fn cleanup_completed(
        run_id: RunId,
        tasks_deleted: usize,
        buckets_deleted: usize,
        failures: usize,
    ) -> Self {
        Event::CleanupCompleted {
            run_id,
            tasks_deleted,
            buckets_deleted,
            failures,
            timestamp: Instant::now(),
        }
    }

    pub fn run_completed(job_id: JobId, run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            job_id,
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
