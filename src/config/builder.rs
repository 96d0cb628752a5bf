//! Pipeline builder from YAML configuration.
//!
//! This module converts a [`PipelineConfig`] into a [`Job`] and the
//! [`RunSettings`] it should run with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::bucket::BucketSpec;
use crate::core::job::Job;
use crate::core::retry::BackoffPolicy;
use crate::core::task::{DockerImage, TaskSpec};
use crate::core::types::TaskId;
use crate::execution::RunSettings;
use crate::report::ReportSettings;

use super::yaml::{
    ConfigError, ImageConfig, PipelineConfig, RetryConfig, SettingsConfig, TaskConfig, YamlLoader,
};

/// A job together with its run settings.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub job: Job,
    pub settings: RunSettings,
}

/// Builder for creating pipelines from YAML configuration.
pub struct PipelineConfigBuilder;

impl PipelineConfigBuilder {
    /// Build a pipeline, keeping local paths as written.
    pub fn build(config: &PipelineConfig) -> Result<Pipeline, ConfigError> {
        Self::build_relative_to(config, None)
    }

    /// Build a pipeline, resolving relative local paths against `base`.
    pub fn build_relative_to(
        config: &PipelineConfig,
        base: Option<&Path>,
    ) -> Result<Pipeline, ConfigError> {
        let resolve = |path: &PathBuf| match base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.clone(),
        };

        let mut job = Job::new(config.id.as_str(), config.name.as_str())
            .with_dependencies(config.use_dependencies);

        for bucket_config in &config.buckets {
            let mut bucket = BucketSpec::new(bucket_config.id.as_str());
            if let Some(dir) = &bucket_config.sync_dir {
                bucket = bucket.with_sync_dir(resolve(dir));
            }
            for file in &bucket_config.files {
                bucket = bucket.with_file(resolve(file));
            }
            job.add_bucket(bucket)?;
        }

        for task_config in &config.tasks {
            let mut task = Self::build_task(config, task_config);
            if let Some(dir) = &task_config.download_to {
                task = task.with_download_to(resolve(dir));
            }
            job.add_task(task)?;
        }

        for task_config in &config.tasks {
            if task_config.depends_on.is_empty() {
                continue;
            }
            let predecessors: Vec<TaskId> = task_config
                .depends_on
                .iter()
                .map(|d| TaskId::new(d.as_str()))
                .collect();
            job.declare_dependency(&TaskId::new(task_config.id.as_str()), &predecessors)?;
        }

        job.validate()?;

        Ok(Pipeline {
            job,
            settings: Self::build_settings(&config.settings),
        })
    }

    /// Build a task, layering constants: pipeline constants, then image and
    /// command, then the task's own constants.
    fn build_task(pipeline: &PipelineConfig, config: &TaskConfig) -> TaskSpec {
        let mut task = TaskSpec::new(config.id.as_str()).with_instances(config.instances);

        if let Some(profile) = config.profile.as_ref().or(pipeline.profile.as_ref()) {
            task = task.with_profile(profile.as_str());
        }
        for (key, value) in &pipeline.constants {
            task = task.with_constant(key.as_str(), value.as_str());
        }
        if let Some(image) = config.image.as_ref().or(pipeline.image.as_ref()) {
            task = task.with_image(&Self::convert_image(image));
        }
        if let Some(command) = &config.command {
            task = task.with_command(command);
        }
        for (key, value) in &config.constants {
            task = task.with_constant(key.as_str(), value.as_str());
        }

        for bucket in &config.resources {
            task = task.with_resource(bucket.as_str());
        }
        if let Some(bucket) = &config.results {
            task = task.with_results(bucket.as_str());
        }
        if let Some(pattern) = &config.results_whitelist {
            task = task.with_results_whitelist(pattern.as_str());
        }
        task
    }

    fn convert_image(config: &ImageConfig) -> DockerImage {
        DockerImage::new(config.repo.as_str(), config.tag.as_str())
    }

    /// Convert run settings.
    pub fn build_settings(config: &SettingsConfig) -> RunSettings {
        let mut report = ReportSettings::default();
        if let Some(speedup) = &config.report.speedup {
            report = report.with_speedup(speedup.baseline.as_str(), speedup.candidate.as_str());
        }
        for note in &config.report.notes {
            report = report.with_note(note.as_str());
        }

        let mut settings = RunSettings::default()
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_wait_timeout(Duration::from_millis(config.wait_timeout_ms))
            .with_backoff(Self::build_backoff(&config.retry))
            .with_cleanup(config.cleanup)
            .with_report(report);
        if let Some(secs) = config.max_wait_secs {
            settings = settings.with_max_wait(Duration::from_secs(secs));
        }
        if let Some(url) = &config.diagnostics_url {
            settings = settings.with_diagnostics_url(url.as_str());
        }
        settings
    }

    fn build_backoff(config: &RetryConfig) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

/// Load a pipeline file, resolving local paths against its directory.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<Pipeline, ConfigError> {
    let path = path.as_ref();
    let config = YamlLoader::load_pipeline_config(path)?;
    PipelineConfigBuilder::build_relative_to(&config, path.parent())
}
