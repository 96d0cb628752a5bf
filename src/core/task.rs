//! Task definitions and lifecycle state.
//!
//! A [`TaskSpec`] describes one unit of remote containerized work: the
//! profile it runs on, how many instances to start, the constants handed to
//! the container and the buckets it reads from and writes to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::types::{BucketId, TaskId};

/// Constant holding the docker repository a task runs.
pub const DOCKER_REPO: &str = "DOCKER_REPO";
/// Constant holding the docker image tag.
pub const DOCKER_TAG: &str = "DOCKER_TAG";
/// Constant holding the command run inside the container.
pub const DOCKER_CMD: &str = "DOCKER_CMD";

/// Profile used when a task does not name one.
pub const DEFAULT_PROFILE: &str = "docker-batch";

/// Lifecycle state of a task, as last observed from the remote service.
///
/// States only ever move forward. `Success`, `Failure` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskState {
    /// Created locally, not yet handed to the service.
    #[default]
    Pending,
    /// Accepted by the service, waiting for dependencies or capacity.
    Submitted,
    /// Instances are running.
    FullyExecuting,
    /// Every instance finished successfully.
    Success,
    /// At least one instance failed.
    Failure,
    /// The task was cancelled or deleted remotely.
    Cancelled,
}

impl TaskState {
    /// Whether no further transition can happen from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failure | TaskState::Cancelled
        )
    }

    /// Map a raw remote state name onto the local lifecycle.
    ///
    /// Intermediate dispatch and transfer states collapse onto the nearest
    /// lifecycle stage. Returns `None` for names the client does not know.
    pub fn from_remote(raw: &str) -> Option<Self> {
        match raw {
            "Submitted" | "PartiallyDispatched" | "FullyDispatched" => Some(TaskState::Submitted),
            "PartiallyExecuting" | "FullyExecuting" | "UploadingResults"
            | "DownloadingResults" => Some(TaskState::FullyExecuting),
            "Success" => Some(TaskState::Success),
            "Failure" => Some(TaskState::Failure),
            "Cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Submitted => 1,
            TaskState::FullyExecuting => 2,
            TaskState::Success | TaskState::Failure | TaskState::Cancelled => 3,
        }
    }

    /// Whether moving from `self` to `next` goes forward through the lifecycle.
    pub fn can_advance_to(&self, next: TaskState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "Pending",
            TaskState::Submitted => "Submitted",
            TaskState::FullyExecuting => "FullyExecuting",
            TaskState::Success => "Success",
            TaskState::Failure => "Failure",
            TaskState::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A docker image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    pub repo: String,
    pub tag: String,
}

impl DockerImage {
    pub fn new(repo: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            tag: tag.into(),
        }
    }

    /// Parse `repo:tag`, defaulting the tag to `latest`.
    pub fn parse(reference: &str) -> Self {
        match reference.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => Self::new(repo, tag),
            _ => Self::new(reference, "latest"),
        }
    }
}

/// Definition of one remote task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task identifier, unique within its job.
    pub id: TaskId,
    /// Execution profile on the remote service.
    pub profile: String,
    /// Number of parallel instances.
    pub instance_count: u32,
    /// Configuration handed to the container.
    pub constants: BTreeMap<String, String>,
    /// Input buckets, mounted in order.
    pub resources: Vec<BucketId>,
    /// Output bucket.
    pub results: Option<BucketId>,
    /// Pattern restricting which output files are kept.
    pub results_whitelist: Option<String>,
    /// Local directory the results are downloaded to after a successful run.
    pub download_to: Option<PathBuf>,
}

impl TaskSpec {
    /// Create a single-instance task on the default profile.
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            profile: DEFAULT_PROFILE.to_string(),
            instance_count: 1,
            constants: BTreeMap::new(),
            resources: Vec::new(),
            results: None,
            results_whitelist: None,
            download_to: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_instances(mut self, count: u32) -> Self {
        self.instance_count = count;
        self
    }

    pub fn with_constant(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(key.into(), value.into());
        self
    }

    /// Set the docker repository and tag constants.
    pub fn with_image(self, image: &DockerImage) -> Self {
        self.with_constant(DOCKER_REPO, image.repo.clone())
            .with_constant(DOCKER_TAG, image.tag.clone())
    }

    /// Set the container command.
    ///
    /// The command is wrapped in single quotes so the container entrypoint
    /// receives it as one shell word.
    pub fn with_command(self, command: &str) -> Self {
        self.with_constant(DOCKER_CMD, quote_command(command))
    }

    pub fn with_resource(mut self, bucket: impl Into<BucketId>) -> Self {
        self.resources.push(bucket.into());
        self
    }

    pub fn with_results(mut self, bucket: impl Into<BucketId>) -> Self {
        self.results = Some(bucket.into());
        self
    }

    pub fn with_results_whitelist(mut self, pattern: impl Into<String>) -> Self {
        self.results_whitelist = Some(pattern.into());
        self
    }

    pub fn with_download_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_to = Some(path.into());
        self
    }

    /// Every bucket this task touches, inputs first.
    pub fn buckets(&self) -> impl Iterator<Item = &BucketId> {
        self.resources.iter().chain(self.results.iter())
    }
}

fn quote_command(command: &str) -> String {
    let trimmed = command.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        trimmed.to_string()
    } else {
        format!("'{}'", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Submitted.is_terminal());
        assert!(!TaskState::FullyExecuting.is_terminal());
    }

    #[test]
    fn test_states_only_advance() {
        assert!(TaskState::Pending.can_advance_to(TaskState::Submitted));
        assert!(TaskState::Submitted.can_advance_to(TaskState::Failure));
        assert!(!TaskState::FullyExecuting.can_advance_to(TaskState::Submitted));
        assert!(!TaskState::Success.can_advance_to(TaskState::Failure));
        assert!(!TaskState::Submitted.can_advance_to(TaskState::Submitted));
    }

    #[test]
    fn test_from_remote() {
        assert_eq!(
            TaskState::from_remote("FullyDispatched"),
            Some(TaskState::Submitted)
        );
        assert_eq!(
            TaskState::from_remote("UploadingResults"),
            Some(TaskState::FullyExecuting)
        );
        assert_eq!(TaskState::from_remote("Success"), Some(TaskState::Success));
        assert_eq!(TaskState::from_remote("success"), None);
        assert_eq!(TaskState::from_remote("Exploded"), None);
    }

    #[test]
    fn test_docker_image_parse() {
        let image = DockerImage::parse("qarnotlab/pymor_fenics:2020.2.0_2019.1.0");
        assert_eq!(image.repo, "qarnotlab/pymor_fenics");
        assert_eq!(image.tag, "2020.2.0_2019.1.0");

        let image = DockerImage::parse("library/ubuntu");
        assert_eq!(image.tag, "latest");

        let image = DockerImage::parse("registry:5000/tools/app");
        assert_eq!(image.repo, "registry:5000/tools/app");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_task_builder_sets_docker_constants() {
        let task = TaskSpec::new("train")
            .with_instances(30)
            .with_image(&DockerImage::new("repo/image", "1.0"))
            .with_command("python3 main.py -n 120")
            .with_resource("input")
            .with_results("fom-results")
            .with_results_whitelist("_c.h5");

        assert_eq!(task.instance_count, 30);
        assert_eq!(task.profile, DEFAULT_PROFILE);
        assert_eq!(task.constants[DOCKER_REPO], "repo/image");
        assert_eq!(task.constants[DOCKER_TAG], "1.0");
        assert_eq!(task.constants[DOCKER_CMD], "'python3 main.py -n 120'");
        let buckets: Vec<&str> = task.buckets().map(|b| b.as_str()).collect();
        assert_eq!(buckets, vec!["input", "fom-results"]);
    }

    #[test]
    fn test_command_already_quoted_is_kept() {
        let task = TaskSpec::new("t").with_command("'sh -c \"echo hi\"'");
        assert_eq!(task.constants[DOCKER_CMD], "'sh -c \"echo hi\"'");
    }
}
