//! Job definition: tasks, buckets and the dependency graph between tasks.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::bucket::BucketSpec;
use super::dag::{DagError, TaskGraph};
use super::task::TaskSpec;
use super::types::{BucketId, JobId, TaskId};

/// Errors that make a job unsubmittable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// Invalid dependency graph.
    #[error(transparent)]
    Dag(#[from] DagError),

    /// The job has no task.
    #[error("job '{0}' has no task")]
    Empty(JobId),

    /// A bucket was declared twice.
    #[error("duplicate bucket: {0}")]
    DuplicateBucket(BucketId),

    /// A task references a bucket the job does not declare.
    #[error("task '{task}' references unknown bucket '{bucket}'")]
    UnknownBucket { task: TaskId, bucket: BucketId },

    /// A task asks for zero instances.
    #[error("task '{0}' must run at least one instance")]
    NoInstances(TaskId),

    /// Dependencies were declared but the job does not resolve them.
    #[error("job '{0}' declares task dependencies but has dependency resolution disabled")]
    DependenciesDisabled(JobId),
}

/// A named collection of tasks with dependency edges.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    name: String,
    use_dependencies: bool,
    buckets: Vec<BucketSpec>,
    tasks: Vec<TaskSpec>,
    index: HashMap<TaskId, usize>,
    graph: TaskGraph,
}

impl Job {
    /// Create an empty job with dependency resolution enabled.
    pub fn new(id: impl Into<JobId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            use_dependencies: true,
            buckets: Vec::new(),
            tasks: Vec::new(),
            index: HashMap::new(),
            graph: TaskGraph::new(),
        }
    }

    /// Builder: toggle remote dependency resolution.
    pub fn with_dependencies(mut self, enabled: bool) -> Self {
        self.use_dependencies = enabled;
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uses_dependencies(&self) -> bool {
        self.use_dependencies
    }

    pub fn buckets(&self) -> &[BucketSpec] {
        &self.buckets
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn get_task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.index.get(id).map(|i| &self.tasks[*i])
    }

    pub fn get_bucket(&self, id: &BucketId) -> Option<&BucketSpec> {
        self.buckets.iter().find(|b| &b.id == id)
    }

    /// Declare a bucket.
    pub fn add_bucket(&mut self, bucket: BucketSpec) -> Result<(), JobError> {
        if self.get_bucket(&bucket.id).is_some() {
            return Err(JobError::DuplicateBucket(bucket.id));
        }
        self.buckets.push(bucket);
        Ok(())
    }

    /// Add a task with no dependencies.
    pub fn add_task(&mut self, task: TaskSpec) -> Result<(), JobError> {
        self.graph.add_task(task.id.clone())?;
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Declare that `task` waits on every task in `predecessors`.
    pub fn declare_dependency(
        &mut self,
        task: &TaskId,
        predecessors: &[TaskId],
    ) -> Result<(), JobError> {
        self.graph.declare_dependency(task, predecessors)?;
        Ok(())
    }

    /// Tasks reading from or writing to `bucket`.
    pub fn tasks_using(&self, bucket: &BucketId) -> Vec<&TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.buckets().any(|b| b == bucket))
            .map(|t| &t.id)
            .collect()
    }

    /// Check everything that can be checked before talking to the service.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.tasks.is_empty() {
            return Err(JobError::Empty(self.id.clone()));
        }

        let known: HashSet<&BucketId> = self.buckets.iter().map(|b| &b.id).collect();
        for task in &self.tasks {
            if task.instance_count == 0 {
                return Err(JobError::NoInstances(task.id.clone()));
            }
            for bucket in task.buckets() {
                if !known.contains(bucket) {
                    return Err(JobError::UnknownBucket {
                        task: task.id.clone(),
                        bucket: bucket.clone(),
                    });
                }
            }
        }

        if self.graph.has_edges() && !self.use_dependencies {
            return Err(JobError::DependenciesDisabled(self.id.clone()));
        }

        Ok(())
    }
}

/// Fluent construction of a [`Job`], stopping at the first error.
pub struct JobBuilder {
    job: Job,
    error: Option<JobError>,
}

impl JobBuilder {
    pub fn new(id: impl Into<JobId>, name: impl Into<String>) -> Self {
        Self {
            job: Job::new(id, name),
            error: None,
        }
    }

    pub fn use_dependencies(mut self, enabled: bool) -> Self {
        self.job.use_dependencies = enabled;
        self
    }

    pub fn bucket(mut self, bucket: BucketSpec) -> Self {
        if self.error.is_none() {
            self.error = self.job.add_bucket(bucket).err();
        }
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        if self.error.is_none() {
            self.error = self.job.add_task(task).err();
        }
        self
    }

    /// Add a task that waits on the named predecessors.
    pub fn task_after(mut self, task: TaskSpec, predecessors: &[&str]) -> Self {
        let id = task.id.clone();
        self = self.task(task);
        if self.error.is_none() {
            let preds: Vec<TaskId> = predecessors.iter().map(|p| TaskId::new(*p)).collect();
            self.error = self.job.declare_dependency(&id, &preds).err();
        }
        self
    }

    /// Build and validate the job.
    pub fn build(self) -> Result<Job, JobError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.job.validate()?;
        Ok(self.job)
    }
}
