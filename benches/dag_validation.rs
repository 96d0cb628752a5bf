//! Benchmarks for dependency bookkeeping.
//!
//! Measures the overhead of:
//! - Declaring dependencies, each checked for cycles on insertion
//! - Computing the submission order
//! - Validating a pipeline file before any remote call

use batchpipe::pipelines::{RomPipelineParams, rom_pipeline};
use batchpipe::{TaskGraph, TaskId, YamlLoader};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

fn ids(prefix: &str, size: usize) -> Vec<TaskId> {
    (0..size)
        .map(|i| TaskId::new(format!("{}_{}", prefix, i)))
        .collect()
}

/// Build a linear graph: A -> B -> C -> ... -> N
fn build_linear_graph(size: usize) -> TaskGraph {
    let mut graph = TaskGraph::new();
    let tasks = ids("task", size);
    for (i, id) in tasks.iter().enumerate() {
        graph.add_task(id.clone()).unwrap();
        if i > 0 {
            graph
                .declare_dependency(id, std::slice::from_ref(&tasks[i - 1]))
                .unwrap();
        }
    }
    graph
}

/// Build a diamond graph: start -> [middle_0 .. middle_n] -> end
fn build_diamond_graph(width: usize) -> TaskGraph {
    let mut graph = TaskGraph::new();
    let start = TaskId::new("start");
    graph.add_task(start.clone()).unwrap();

    let middle = ids("middle", width);
    for id in &middle {
        graph.add_task(id.clone()).unwrap();
        graph
            .declare_dependency(id, std::slice::from_ref(&start))
            .unwrap();
    }

    let end = TaskId::new("end");
    graph.add_task(end.clone()).unwrap();
    graph.declare_dependency(&end, &middle).unwrap();
    graph
}

fn bench_declare_dependencies(c: &mut Criterion) {
    let mut group = c.benchmark_group("declare_dependencies");

    for size in [100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("linear", size), size, |b, &size| {
            b.iter(|| build_linear_graph(size));
        });

        group.bench_with_input(BenchmarkId::new("diamond", size), size, |b, &size| {
            b.iter(|| build_diamond_graph(size));
        });
    }

    group.finish();
}

fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");

    for size in [100, 500].iter() {
        let linear = build_linear_graph(*size);
        group.bench_with_input(BenchmarkId::new("linear", size), &linear, |b, graph| {
            b.iter(|| graph.topological_order());
        });

        let diamond = build_diamond_graph(*size);
        group.bench_with_input(BenchmarkId::new("diamond", size), &diamond, |b, graph| {
            b.iter(|| graph.topological_order());
        });
    }

    group.finish();
}

fn bench_pipeline_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_validation");

    let rom = rom_pipeline(&RomPipelineParams::default());
    group.bench_function("rom", |b| {
        b.iter(|| YamlLoader::validate_pipeline_config(&rom).unwrap());
    });

    let yaml = YamlLoader::to_yaml(&rom).unwrap();
    group.bench_function("rom_parse", |b| {
        b.iter(|| YamlLoader::parse_pipeline_config(&yaml).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_declare_dependencies,
    bench_topological_order,
    bench_pipeline_validation
);

criterion_main!(benches);
