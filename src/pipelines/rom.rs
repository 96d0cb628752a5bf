//! Reduced-order-model training and validation pipeline.
//!
//! Six stages on the `qarnotlab/pymor_fenics` image:
//!
//! ```text
//! train ──────► rom-build ──┐
//!                           ▼
//! write-param ─┬─────────► rom-val ──► rom-compare
//!              └─► fom-val ───────────────┘
//! ```
//!
//! `train` solves the full-order model on the training parameters, spread
//! over many instances, and `rom-build` reduces those snapshots to a basis.
//! `fom-val` and `rom-val` solve the validation set with both models; their
//! execution times give the speed-up. `rom-compare` plots the errors into the
//! `compare` bucket.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::{
    BucketConfig, ConfigError, ImageConfig, Pipeline, PipelineConfig, PipelineConfigBuilder,
    ReportConfig, SettingsConfig, SpeedupConfig, TaskConfig,
};
use crate::core::task::DockerImage;

pub const TRAIN: &str = "train";
pub const ROM_BUILD: &str = "rom-build";
pub const WRITE_PARAM: &str = "write-param";
pub const FOM_VAL: &str = "fom-val";
pub const ROM_VAL: &str = "rom-val";
pub const ROM_COMPARE: &str = "rom-compare";

const INPUT: &str = "input";
const FOM_RESULTS: &str = "fom-results";
const ROM: &str = "rom";
const ROM_RESULTS: &str = "rom-results";
const PARAM: &str = "param";
const COMPARE: &str = "compare";

/// Compressed solution files; the raw ones are not kept.
const COMPRESSED_WHITELIST: &str = "_c.h5";

const CONSOLE_URL: &str = "https://console.qarnot.com/app/tasks";

/// Sizes of the ROM study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomPipelineParams {
    /// Training parameters sampled for the full-order snapshots.
    pub train_params: u32,
    /// Instances sharing the training solves.
    pub train_instances: u32,
    /// Validation parameters.
    pub val_params: u32,
    /// Instances sharing the full-order validation solves.
    pub val_instances: u32,
    /// Size of the reduced basis.
    pub rb_size: u32,
    pub image: DockerImage,
    /// Local directory holding the solver scripts and mesh.
    pub input_dir: PathBuf,
}

impl Default for RomPipelineParams {
    fn default() -> Self {
        Self {
            train_params: 120,
            train_instances: 30,
            val_params: 50,
            val_instances: 25,
            rb_size: 50,
            image: DockerImage::new("qarnotlab/pymor_fenics", "2020.2.0_2019.1.0"),
            input_dir: PathBuf::from("input"),
        }
    }
}

fn task(id: &str, instances: u32, command: String) -> TaskConfig {
    TaskConfig {
        id: id.to_string(),
        instances,
        profile: None,
        image: None,
        command: Some(command),
        constants: BTreeMap::new(),
        resources: vec![INPUT.to_string()],
        results: None,
        results_whitelist: None,
        download_to: None,
        depends_on: Vec::new(),
    }
}

fn with_resources(mut task: TaskConfig, buckets: &[&str]) -> TaskConfig {
    task.resources.extend(buckets.iter().map(|b| b.to_string()));
    task
}

fn with_results(mut task: TaskConfig, bucket: &str) -> TaskConfig {
    task.results = Some(bucket.to_string());
    task
}

fn after(mut task: TaskConfig, predecessors: &[&str]) -> TaskConfig {
    task.depends_on = predecessors.iter().map(|p| p.to_string()).collect();
    task
}

/// Solve then compress each instance's snapshot file.
fn solve_and_compress(solve: &str, dir: &str) -> String {
    format!(
        "{solve} -o {dir}/u && h5repack -f GZIP=1 {dir}/u${{INSTANCE_ID}}.h5 {dir}/u${{INSTANCE_ID}}_c.h5"
    )
}

/// The ROM pipeline as a configuration, ready to be printed or built.
pub fn rom_pipeline(params: &RomPipelineParams) -> PipelineConfig {
    let bucket = |id: &str| BucketConfig {
        id: id.to_string(),
        sync_dir: None,
        files: Vec::new(),
    };
    let mut input = bucket(INPUT);
    input.sync_dir = Some(params.input_dir.clone());

    let mut train = with_results(
        task(
            TRAIN,
            params.train_instances,
            solve_and_compress(&format!("python3 main.py -n {}", params.train_params), "train"),
        ),
        FOM_RESULTS,
    );
    train.results_whitelist = Some(COMPRESSED_WHITELIST.to_string());

    let write_param = with_results(
        task(
            WRITE_PARAM,
            1,
            format!("python3 writeparam.py {}", params.val_params),
        ),
        PARAM,
    );

    let mut rom_build = after(
        with_results(
            task(
                ROM_BUILD,
                1,
                format!(
                    "python3 rombuild.py -n {} -m {} -i train",
                    params.train_instances, params.rb_size
                ),
            ),
            ROM,
        ),
        &[TRAIN],
    );
    // snapshots are mounted ahead of the scripts
    rom_build.resources = vec![FOM_RESULTS.to_string(), INPUT.to_string()];

    let mut fom_val = after(
        with_results(
            with_resources(
                task(
                    FOM_VAL,
                    params.val_instances,
                    solve_and_compress("python3 main.py -i param.pkl", "val"),
                ),
                &[PARAM],
            ),
            FOM_RESULTS,
        ),
        &[WRITE_PARAM],
    );
    fom_val.results_whitelist = Some(COMPRESSED_WHITELIST.to_string());

    let rom_val = after(
        with_results(
            with_resources(
                task(ROM_VAL, 1, "python3 romsolve.py -i param.pkl".to_string()),
                &[ROM, PARAM],
            ),
            ROM_RESULTS,
        ),
        &[WRITE_PARAM, ROM_BUILD],
    );

    let rom_compare = after(
        with_results(
            with_resources(
                task(ROM_COMPARE, 1, "python3 romcompare.py -i val".to_string()),
                &[ROM, ROM_RESULTS, FOM_RESULTS],
            ),
            COMPARE,
        ),
        &[ROM_VAL, FOM_VAL],
    );

    PipelineConfig {
        id: "rom".to_string(),
        name: "rom-job".to_string(),
        description: Some(format!(
            "Reduced basis of size {} trained on {} parameters, validated on {}",
            params.rb_size, params.train_params, params.val_params
        )),
        use_dependencies: true,
        profile: Some(crate::core::task::DEFAULT_PROFILE.to_string()),
        image: Some(ImageConfig {
            repo: params.image.repo.clone(),
            tag: params.image.tag.clone(),
        }),
        constants: BTreeMap::new(),
        buckets: vec![
            input,
            bucket(FOM_RESULTS),
            bucket(ROM),
            bucket(ROM_RESULTS),
            bucket(PARAM),
            bucket(COMPARE),
        ],
        tasks: vec![train, write_param, rom_build, fom_val, rom_val, rom_compare],
        settings: SettingsConfig {
            diagnostics_url: Some(CONSOLE_URL.to_string()),
            report: ReportConfig {
                speedup: Some(SpeedupConfig {
                    baseline: FOM_VAL.to_string(),
                    candidate: ROM_VAL.to_string(),
                }),
                notes: vec![
                    format!("ROM precision: see the output of task {} in the console", ROM_COMPARE),
                    format!("Bucket '{}' contains graphs of the errors", COMPARE),
                ],
            },
            ..SettingsConfig::default()
        },
    }
}

/// Build the ROM pipeline into a runnable job.
pub fn rom_job(params: &RomPipelineParams) -> Result<Pipeline, ConfigError> {
    PipelineConfigBuilder::build(&rom_pipeline(params))
}
