//! Configuration loading and parsing.
//!
//! This module provides YAML-based pipeline definitions and run settings.

mod builder;
mod yaml;

pub use builder::{Pipeline, PipelineConfigBuilder, load_pipeline};
pub use yaml::{
    BucketConfig, ConfigError, ImageConfig, PipelineConfig, ReportConfig, RetryConfig,
    SettingsConfig, SpeedupConfig, TaskConfig, YamlLoader,
};
