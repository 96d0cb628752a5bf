//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use batchpipe::pipelines::{RomPipelineParams, rom_job};
use batchpipe::{BucketSpec, Event, Job, JobBuilder, Pipeline, TaskId, TaskSpec};
use std::path::{Path, PathBuf};

/// A, B after A, C after A and B, C writing to bucket `out`.
pub fn diamond_job() -> Job {
    JobBuilder::new("diamond", "Diamond")
        .bucket(BucketSpec::new("out"))
        .task(TaskSpec::new("a"))
        .task_after(TaskSpec::new("b"), &["a"])
        .task_after(TaskSpec::new("c").with_results("out"), &["a", "b"])
        .build()
        .unwrap()
}

/// The ROM pipeline at a small size, staging `input_dir`.
pub fn small_rom(input_dir: &Path) -> Pipeline {
    let params = RomPipelineParams {
        train_params: 12,
        train_instances: 3,
        val_params: 5,
        val_instances: 2,
        rb_size: 4,
        input_dir: input_dir.to_path_buf(),
        ..RomPipelineParams::default()
    };
    rom_job(&params).unwrap()
}

/// Create an input directory with a solver script and a mesh.
pub fn input_dir(root: &Path) -> PathBuf {
    let dir = root.join("input");
    std::fs::create_dir_all(dir.join("mesh")).unwrap();
    std::fs::write(dir.join("main.py"), "print('solve')\n").unwrap();
    std::fs::write(dir.join("mesh").join("domain.xml"), "<mesh/>\n").unwrap();
    dir
}

/// Write a pipeline file into `dir`.
pub fn write_pipeline(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("pipeline.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

/// Index of the first event matching `pred`.
pub fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> Option<usize> {
    events.iter().position(pred)
}

/// Events concerning `task`, after index `from`.
pub fn events_for_after<'a>(events: &'a [Event], task: &str, from: usize) -> Vec<&'a Event> {
    events[from + 1..]
        .iter()
        .filter(|e| e.task_id() == Some(&TaskId::new(task)))
        .collect()
}
