//! batchpipe - dependency-aware job submission for remote batch services.
//!
//! Buckets, tasks and the dependency edges between tasks are declared
//! locally, validated, submitted to a [`BatchService`], polled until every
//! task is terminal, and released afterwards.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod pipelines;
pub mod remote;
pub mod report;
pub mod testing;

pub use config::{ConfigError, Pipeline, PipelineConfig, PipelineConfigBuilder, YamlLoader, load_pipeline};
pub use crate::core::bucket::BucketSpec;
pub use crate::core::dag::{DagError, TaskGraph};
pub use crate::core::job::{Job, JobBuilder, JobError};
pub use crate::core::retry::BackoffPolicy;
pub use crate::core::task::{DockerImage, TaskSpec, TaskState};
pub use crate::core::types::{BucketId, JobId, RunId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    CleanupPolicy, CleanupReport, ExecutionError, PipelineRunner, Poller, RunFailure, RunOutcome,
    RunSettings, Session, Submitter, TrackedTask,
};
pub use remote::{BatchService, FailureInjection, RemoteError, SimulatedBatchService};
pub use report::{ExecutionReport, ReportError, ReportSettings, parse_wall_clock, speedup};
