//! Core identifier types for the pipeline client.
//!
//! These types provide type-safe identifiers for tasks, jobs, buckets and runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a task within a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

/// Identifier of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

/// Identifier of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId(String);

/// Unique identifier for one pipeline run (one session against the service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create a new identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(TaskId);
string_id!(JobId);
string_id!(BucketId);

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_task_id_display() {
        let task_id = TaskId::new("rom-build");
        assert_eq!(format!("{}", task_id), "rom-build");
        assert_eq!(task_id.as_str(), "rom-build");
    }

    #[test]
    fn test_ids_from_str() {
        let task: TaskId = "train".into();
        let job: JobId = String::from("rom-job").into();
        let bucket: BucketId = "fom-results".into();

        assert_eq!(task, TaskId::new("train"));
        assert_eq!(job.as_str(), "rom-job");
        assert_eq!(bucket.to_string(), "fom-results");
    }

    #[test]
    fn test_run_id_is_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_run_id_from_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(RunId::from_uuid(uuid).as_uuid(), &uuid);
    }

    #[test]
    fn test_ids_are_hashable() {
        let mut ids: HashSet<BucketId> = HashSet::new();
        ids.insert(BucketId::new("input"));
        ids.insert(BucketId::new("param"));
        ids.insert(BucketId::new("input"));

        assert_eq!(ids.len(), 2);
    }
}
