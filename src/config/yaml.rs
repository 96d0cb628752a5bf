//! YAML configuration parsing.
//!
//! Parses pipeline definitions (buckets, tasks, dependencies and run
//! settings) from YAML files.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::dag::{DagError, TaskGraph};
use crate::core::job::JobError;
use crate::core::types::TaskId;
use crate::execution::CleanupPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The configuration does not describe a submittable job.
    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),
}

/// A pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Job identifier.
    pub id: String,
    /// Human-readable name, also used for the remote job.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the remote job resolves task dependencies.
    #[serde(default = "default_true")]
    pub use_dependencies: bool,
    /// Profile for tasks that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Image for tasks that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    /// Constants handed to every task, overridden per task.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, String>,
    /// Bucket definitions.
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
    /// Task definitions.
    pub tasks: Vec<TaskConfig>,
    /// Polling, retry and cleanup settings.
    #[serde(default)]
    pub settings: SettingsConfig,
}

fn default_true() -> bool {
    true
}

/// Docker image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub repo: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Bucket configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket identifier, also its remote name.
    pub id: String,
    /// Local directory mirrored into the bucket, relative to the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_dir: Option<PathBuf>,
    /// Local files uploaded into the bucket, relative to the file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
}

/// Task configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task identifier (unique within the pipeline).
    pub id: String,
    /// Number of parallel instances.
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Execution profile, defaulting to the pipeline's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Image override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
    /// Command run in the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra constants.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, String>,
    /// Input buckets, mounted in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// Output bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
    /// Only result files containing this pattern are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_whitelist: Option<String>,
    /// Local directory results are downloaded to, relative to the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_to: Option<PathBuf>,
    /// Dependencies on other tasks in this pipeline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn default_instances() -> u32 {
    1
}

/// Run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Sleep between polling rounds in milliseconds.
    pub poll_interval_ms: u64,
    /// Bound of each remote wait call in milliseconds.
    pub wait_timeout_ms: u64,
    /// Give up waiting after this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait_secs: Option<u64>,
    /// Retry policy for transient remote failures.
    pub retry: RetryConfig,
    /// Whether remote resources are deleted at the end of the run.
    pub cleanup: CleanupPolicy,
    /// Console page printed alongside task failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_url: Option<String>,
    pub report: ReportConfig,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            wait_timeout_ms: 100,
            max_wait_secs: None,
            retry: RetryConfig::default(),
            cleanup: CleanupPolicy::Always,
            diagnostics_url: None,
            report: ReportConfig::default(),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first failure.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound of any delay in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between retries.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Report configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speedup: Option<SpeedupConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Two tasks whose execution times are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedupConfig {
    pub baseline: String,
    pub candidate: String,
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a pipeline from a file.
    pub fn load_pipeline_config(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_pipeline_config(&content)
    }

    /// Parse a pipeline from a YAML string.
    pub fn parse_pipeline_config(yaml: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        Self::validate_pipeline_config(&config)?;
        Ok(config)
    }

    /// Render a pipeline back to YAML.
    pub fn to_yaml(config: &PipelineConfig) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(config)?)
    }

    /// Validate a pipeline configuration.
    pub fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
        if config.id.is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if config.tasks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "pipeline must have at least one task".into(),
            ));
        }

        let mut bucket_ids: HashSet<&str> = HashSet::new();
        for bucket in &config.buckets {
            if bucket.id.is_empty() {
                return Err(ConfigError::MissingField("buckets[].id".into()));
            }
            if !bucket_ids.insert(&bucket.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate bucket id: {}",
                    bucket.id
                )));
            }
        }

        let mut task_ids: HashSet<&str> = HashSet::new();
        for task in &config.tasks {
            if task.id.is_empty() {
                return Err(ConfigError::MissingField("tasks[].id".into()));
            }
            if !task_ids.insert(&task.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
            if task.instances == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "task '{}' must run at least one instance",
                    task.id
                )));
            }
            for bucket in task.resources.iter().chain(task.results.iter()) {
                if !bucket_ids.contains(bucket.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' references unknown bucket '{}'",
                        task.id, bucket
                    )));
                }
            }
        }

        for task in &config.tasks {
            let mut seen_deps = HashSet::new();
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' cannot depend on itself",
                        task.id
                    )));
                }
                if !task_ids.contains(dep.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
                if !seen_deps.insert(dep) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "task '{}' has duplicate dependency '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        if !config.use_dependencies && config.tasks.iter().any(|t| !t.depends_on.is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "tasks declare depends_on but use_dependencies is false".into(),
            ));
        }

        Self::validate_no_cycles(config)?;
        Self::validate_settings(config)?;

        Ok(())
    }

    /// Refuse dependency cycles, reporting the first edge that closes one.
    fn validate_no_cycles(config: &PipelineConfig) -> Result<(), ConfigError> {
        let invalid = |e: DagError| ConfigError::InvalidConfig(e.to_string());
        let mut graph = TaskGraph::new();
        for task in &config.tasks {
            graph.add_task(TaskId::new(task.id.as_str())).map_err(invalid)?;
        }
        for task in config.tasks.iter().filter(|t| !t.depends_on.is_empty()) {
            let predecessors: Vec<TaskId> =
                task.depends_on.iter().map(|d| TaskId::new(d.as_str())).collect();
            graph
                .declare_dependency(&TaskId::new(task.id.as_str()), &predecessors)
                .map_err(invalid)?;
        }
        Ok(())
    }

    fn validate_settings(config: &PipelineConfig) -> Result<(), ConfigError> {
        let settings = &config.settings;
        if settings.retry.multiplier < 1.0 || !settings.retry.multiplier.is_finite() {
            return Err(ConfigError::InvalidConfig(format!(
                "retry multiplier must be at least 1, got {}",
                settings.retry.multiplier
            )));
        }
        if settings.max_wait_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_wait_secs cannot be zero".into(),
            ));
        }
        if let Some(speedup) = &settings.report.speedup {
            for id in [&speedup.baseline, &speedup.candidate] {
                if !config.tasks.iter().any(|t| &t.id == id) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "speedup report references unknown task '{}'",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}
