//! Local validation tests.
//!
//! Malformed jobs must be rejected before the service sees a single call.

use batchpipe::testing::TestHarness;
use batchpipe::{
    BucketSpec, ConfigError, DagError, ExecutionError, Job, JobBuilder, JobError, TaskId,
    TaskSpec, YamlLoader, load_pipeline,
};

use crate::common::write_pipeline;

#[test]
fn test_cycle_rejected_when_declared() {
    let mut job = JobBuilder::new("loop", "Loop")
        .task(TaskSpec::new("a"))
        .task_after(TaskSpec::new("b"), &["a"])
        .task_after(TaskSpec::new("c"), &["b"])
        .build()
        .unwrap();

    let err = job
        .declare_dependency(&TaskId::new("a"), &[TaskId::new("c")])
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::Dag(DagError::CyclicDependency { ref task, ref predecessor })
            if task.as_str() == "a" && predecessor.as_str() == "c"
    ));
    assert!(ExecutionError::from(err).is_cyclic_dependency());
}

#[tokio::test]
async fn test_rejected_edge_leaves_job_runnable() {
    let mut job = Job::new("pair", "Pair");
    job.add_task(TaskSpec::new("a")).unwrap();
    job.add_task(TaskSpec::new("b")).unwrap();
    job.declare_dependency(&TaskId::new("b"), &[TaskId::new("a")])
        .unwrap();
    assert!(
        job.declare_dependency(&TaskId::new("a"), &[TaskId::new("b")])
            .is_err()
    );

    let harness = TestHarness::new();
    let result = harness.run(&job).await;

    assert!(result.is_success());
    assert_eq!(harness.service().submission_order(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_unknown_bucket_makes_no_remote_call() {
    let mut job = Job::new("orphan", "Orphan");
    job.add_bucket(BucketSpec::new("input")).unwrap();
    job.add_task(TaskSpec::new("solve").with_resource("inptu"))
        .unwrap();

    let harness = TestHarness::new();
    let result = harness.run(&job).await;
    let failure = result.outcome.as_ref().err().unwrap();

    assert!(matches!(
        failure.error,
        ExecutionError::InvalidJob(JobError::UnknownBucket { .. })
    ));
    assert!(harness.service().calls().is_empty());
    assert!(failure.cleanup.is_clean());
}

#[tokio::test]
async fn test_dependencies_need_resolution_enabled() {
    let mut job = Job::new("flat", "Flat").with_dependencies(false);
    job.add_task(TaskSpec::new("a")).unwrap();
    job.add_task(TaskSpec::new("b")).unwrap();
    job.declare_dependency(&TaskId::new("b"), &[TaskId::new("a")])
        .unwrap();

    let harness = TestHarness::new();
    let result = harness.run(&job).await;

    assert!(matches!(
        result.outcome.as_ref().err().map(|f| &f.error),
        Some(ExecutionError::InvalidJob(JobError::DependenciesDisabled(_)))
    ));
    assert!(harness.service().calls().is_empty());
}

#[tokio::test]
async fn test_empty_job_is_rejected() {
    let harness = TestHarness::new();
    let result = harness.run(&Job::new("empty", "Empty")).await;

    assert!(matches!(
        result.outcome.as_ref().err().map(|f| &f.error),
        Some(ExecutionError::InvalidJob(JobError::Empty(_)))
    ));
    assert!(harness.service().calls().is_empty());
}

#[test]
fn test_yaml_cycle_names_the_tasks() {
    let yaml = r#"
id: loop
name: Loop
tasks:
  - id: prepare
  - id: b
    depends_on: [prepare, a]
  - id: a
    depends_on: [b]
"#;

    let err = YamlLoader::parse_pipeline_config(yaml).unwrap_err();

    match err {
        ConfigError::InvalidConfig(message) => {
            assert_eq!(
                message,
                "cyclic dependency: 'a' cannot wait on 'b', which already depends on it"
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_yaml_file_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = load_pipeline(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(missing, ConfigError::IoError(_)));

    let path = write_pipeline(
        dir.path(),
        r#"
id: bad
name: Bad
buckets:
  - id: input
tasks:
  - id: solve
    resources: [input]
    depends_on: [setup]
"#,
    );
    let err = load_pipeline(&path).unwrap_err();
    assert!(err.to_string().contains("unknown task 'setup'"));

    let path = write_pipeline(dir.path(), "id: [not, a, string]\n");
    assert!(matches!(
        load_pipeline(&path).unwrap_err(),
        ConfigError::YamlError(_)
    ));
}
