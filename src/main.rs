//! bpipe - submit and watch batch pipelines.
//!
//! Usage:
//!   bpipe validate <FILE>           Validate a pipeline file
//!   bpipe list <FILE>               List tasks in dependency order
//!   bpipe simulate <FILE>           Run a pipeline on the simulated service
//!   bpipe rom                       Print the built-in ROM pipeline as YAML
//!   bpipe speedup <BASE> <CAND>     Compare two HH:MM:SS durations

use batchpipe::pipelines::{RomPipelineParams, rom_pipeline};
use batchpipe::{
    CleanupPolicy, DockerImage, Event, EventBus, EventHandler, FailureInjection, PipelineRunner,
    SimulatedBatchService, YamlLoader, load_pipeline, parse_wall_clock, speedup,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// bpipe - dependency-aware batch pipeline client
#[derive(Parser)]
#[command(name = "bpipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline file
    Validate {
        /// Path to the pipeline YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List the tasks of a pipeline in dependency order
    List {
        /// Path to the pipeline YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run a pipeline against the in-process simulated service
    Simulate {
        /// Path to the pipeline YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Make a task fail with a message (TASK=MESSAGE), repeatable
        #[arg(long = "fail", value_name = "TASK=MESSAGE", value_parser = parse_key_value)]
        failures: Vec<(String, String)>,

        /// Report a task's execution time (TASK=HH:MM:SS), repeatable
        #[arg(long = "timing", value_name = "TASK=HH:MM:SS", value_parser = parse_key_value)]
        timings: Vec<(String, String)>,

        /// Answer the first N status calls as unavailable
        #[arg(long, default_value = "0")]
        outages: u32,

        /// Override the poll interval in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Leave remote resources in place after the run
        #[arg(long)]
        keep_remote: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the built-in ROM pipeline as YAML
    Rom {
        /// Number of training parameters
        #[arg(long, default_value = "120")]
        train_params: u32,

        /// Instances sharing the training solves
        #[arg(long, default_value = "30")]
        train_instances: u32,

        /// Number of validation parameters
        #[arg(long, default_value = "50")]
        val_params: u32,

        /// Instances sharing the full-order validation solves
        #[arg(long, default_value = "25")]
        val_instances: u32,

        /// Size of the reduced basis
        #[arg(long, default_value = "50")]
        rb_size: u32,

        /// Docker image as repo:tag
        #[arg(long, default_value = "qarnotlab/pymor_fenics:2020.2.0_2019.1.0")]
        image: String,

        /// Local directory synchronized into the input bucket
        #[arg(long, default_value = "input")]
        input_dir: PathBuf,
    },

    /// Compute how many times faster CANDIDATE ran than BASELINE
    Speedup {
        /// Baseline execution time, HH:MM:SS
        baseline: String,
        /// Candidate execution time, HH:MM:SS
        candidate: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// Logging event handler that prints run events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobSubmitted {
                job_id,
                run_id,
                task_count,
                ..
            } => {
                info!("Job '{}' submitted with {} task(s) (run: {})", job_id, task_count, run_id);
            }
            Event::TaskSubmitted {
                task_id,
                predecessors,
                ..
            } => {
                if predecessors.is_empty() {
                    info!("  Task '{}' submitted", task_id);
                } else {
                    let names: Vec<&str> = predecessors.iter().map(|p| p.as_str()).collect();
                    info!("  Task '{}' submitted (after: {})", task_id, names.join(", "));
                }
            }
            Event::TaskOutput {
                task_id,
                stdout,
                stderr,
                ..
            } => {
                for line in stdout.trim().lines() {
                    info!("    [{}] stdout: {}", task_id, line);
                }
                for line in stderr.trim().lines() {
                    warn!("    [{}] stderr: {}", task_id, line);
                }
            }
            Event::TaskFinished {
                task_id,
                state,
                finished,
                total,
                ..
            } => {
                info!(
                    "  Task '{}' finished with state {}. {}/{}",
                    task_id, state, finished, total
                );
            }
            Event::TaskFailed {
                task_id,
                raw_state,
                errors,
                ..
            } => {
                error!("  Task '{}' failed ({}): {}", task_id, raw_state, errors.join("; "));
            }
            Event::RemoteRetry {
                operation,
                attempt,
                delay,
                error,
                ..
            } => {
                warn!(
                    "  Remote call '{}' failed (attempt {}): {}; retrying in {:?}",
                    operation, attempt, error, delay
                );
            }
            Event::CleanupCompleted {
                tasks_deleted,
                buckets_deleted,
                failures,
                ..
            } => {
                info!(
                    "Released {} task(s) and {} bucket(s){}",
                    tasks_deleted,
                    buckets_deleted,
                    if *failures > 0 {
                        format!(", {} failure(s)", failures)
                    } else {
                        String::new()
                    }
                );
            }
            Event::RunCompleted {
                job_id,
                run_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!(
                        "Job '{}' completed successfully in {:?} (run: {})",
                        job_id, duration, run_id
                    );
                } else {
                    error!("Job '{}' failed after {:?} (run: {})", job_id, duration, run_id);
                }
            }
            Event::TaskStateChanged { .. } => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => validate_pipeline(file)?,
        Commands::List { file } => list_pipeline(file)?,
        Commands::Simulate {
            file,
            failures,
            timings,
            outages,
            poll_interval_ms,
            keep_remote,
            json,
        } => {
            let options = SimulateOptions {
                failures,
                timings,
                outages,
                poll_interval_ms,
                keep_remote,
                json,
            };
            simulate_pipeline(file, options).await?;
        }
        Commands::Rom {
            train_params,
            train_instances,
            val_params,
            val_instances,
            rb_size,
            image,
            input_dir,
        } => {
            let params = RomPipelineParams {
                train_params,
                train_instances,
                val_params,
                val_instances,
                rb_size,
                image: DockerImage::parse(&image),
                input_dir,
            };
            print!("{}", YamlLoader::to_yaml(&rom_pipeline(&params))?);
        }
        Commands::Speedup {
            baseline,
            candidate,
        } => {
            let ratio = speedup(parse_wall_clock(&baseline)?, parse_wall_clock(&candidate)?)?;
            println!("{:.2}", ratio);
        }
    }

    Ok(())
}

/// Validate a pipeline file without running it.
fn validate_pipeline(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating pipeline: {}", file.display());

    match load_pipeline(&file) {
        Ok(pipeline) => {
            info!(
                "Pipeline '{}' ({}) is valid: {} task(s), {} bucket(s)",
                pipeline.job.id(),
                pipeline.job.name(),
                pipeline.job.tasks().len(),
                pipeline.job.buckets().len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List tasks in dependency order.
fn list_pipeline(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load_pipeline(&file)?;
    let job = &pipeline.job;

    println!("ID: {}", job.id());
    println!("  Name: {}", job.name());
    println!("  Dependencies: {}", if job.uses_dependencies() { "resolved" } else { "ignored" });
    println!("  Buckets:");
    for bucket in job.buckets() {
        match &bucket.sync_dir {
            Some(dir) => println!("    - {} (synced from {})", bucket.id, dir.display()),
            None => println!("    - {}", bucket.id),
        }
    }
    println!("  Tasks: {}", job.tasks().len());

    for task_id in job.graph().topological_order() {
        let Some(task) = job.get_task(&task_id) else {
            continue;
        };
        let deps = job.graph().get_dependencies(&task_id).unwrap_or(&[]);
        let mut line = format!("    - {} x{}", task_id, task.instance_count);
        if !deps.is_empty() {
            let dep_names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
            line.push_str(&format!(" (depends on: {})", dep_names.join(", ")));
        }
        println!("{}", line);
        if !task.resources.is_empty() {
            let names: Vec<&str> = task.resources.iter().map(|b| b.as_str()).collect();
            println!("        reads: {}", names.join(", "));
        }
        if let Some(results) = &task.results {
            println!("        writes: {}", results);
        }
    }

    Ok(())
}

struct SimulateOptions {
    failures: Vec<(String, String)>,
    timings: Vec<(String, String)>,
    outages: u32,
    poll_interval_ms: Option<u64>,
    keep_remote: bool,
    json: bool,
}

/// Run a pipeline on the simulated service.
async fn simulate_pipeline(
    file: PathBuf,
    options: SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load_pipeline(&file)?;

    let mut injection = FailureInjection::new().unavailable_for(options.outages);
    for (task, message) in options.failures {
        injection = injection.fail_with(task, message);
    }
    for (task, execution) in options.timings {
        parse_wall_clock(&execution)?;
        injection = injection.timings(task, execution, "00:01:00");
    }

    let mut settings = pipeline.settings.clone();
    if let Some(ms) = options.poll_interval_ms {
        settings = settings.with_poll_interval(Duration::from_millis(ms));
    }
    if options.keep_remote {
        settings = settings.with_cleanup(CleanupPolicy::Never);
    }

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let service = Arc::new(SimulatedBatchService::with_injection(injection));
    let runner = PipelineRunner::new(service, settings).with_event_bus(event_bus);

    info!("waiting for tasks to finish...");
    match runner.run(&pipeline.job).await {
        Ok(outcome) => {
            if options.json {
                println!("{}", serde_json::to_string_pretty(&outcome.report)?);
            } else {
                println!();
                print!("{}", outcome.report.render());
            }
            Ok(())
        }
        Err(failure) => {
            for problem in &failure.cleanup.failures {
                warn!("cleanup: {}", problem);
            }
            Err(failure.into())
        }
    }
}
