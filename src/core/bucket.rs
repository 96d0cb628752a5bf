//! Bucket definitions.
//!
//! A bucket is a named remote object store. Inputs are staged into it from a
//! local directory and/or individual files before any consuming task is
//! submitted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::BucketId;

/// What to upload into a bucket before the job is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub id: BucketId,
    /// Local directory mirrored into the bucket.
    pub sync_dir: Option<PathBuf>,
    /// Individual local files added to the bucket.
    pub files: Vec<PathBuf>,
}

impl BucketSpec {
    /// An empty bucket, typically used for task results.
    pub fn new(id: impl Into<BucketId>) -> Self {
        Self {
            id: id.into(),
            sync_dir: None,
            files: Vec::new(),
        }
    }

    pub fn with_sync_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sync_dir = Some(dir.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Whether anything has to be uploaded before submission.
    pub fn has_inputs(&self) -> bool {
        self.sync_dir.is_some() || !self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bucket_has_no_inputs() {
        let bucket = BucketSpec::new("rom-results");
        assert!(!bucket.has_inputs());
    }

    #[test]
    fn test_bucket_with_inputs() {
        let bucket = BucketSpec::new("input")
            .with_sync_dir("input")
            .with_file("extra/mesh.xml");

        assert!(bucket.has_inputs());
        assert_eq!(bucket.sync_dir, Some(PathBuf::from("input")));
        assert_eq!(bucket.files, vec![PathBuf::from("extra/mesh.xml")]);
    }
}
