//! Built-in pipelines.

pub mod rom;

pub use rom::{RomPipelineParams, rom_job, rom_pipeline};
