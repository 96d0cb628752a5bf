//! Core data model: identifiers, tasks, buckets, jobs and their dependency graph.

pub mod bucket;
pub mod dag;
pub mod job;
pub mod retry;
pub mod task;
pub mod types;
