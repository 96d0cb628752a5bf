//! Pipeline execution against a remote batch service.
//!
//! This module provides submission of a job's task graph, the polling loop
//! that waits for tasks to finish, and the session bookkeeping that releases
//! every remote object afterwards.

mod error;
mod poller;
mod runner;
mod session;
mod settings;
mod submit;
mod tracked;

pub use error::ExecutionError;
pub use poller::Poller;
pub use runner::{PipelineRunner, RunFailure, RunOutcome};
pub use session::{CleanupReport, Session};
pub use settings::{CleanupPolicy, RunSettings};
pub use submit::Submitter;
pub use tracked::TrackedTask;
