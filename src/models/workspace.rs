//! Represents one request's isolated scratch directory.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// An isolated, randomly named directory under the upload base directory.
///
/// Only `WorkspaceManager` constructs these, so `root` is always a direct
/// child of the base directory and never derived from user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    created_at: DateTime<Utc>,
}

impl Workspace {
    pub(crate) fn new(root: PathBuf, created_at: DateTime<Utc>) -> Self {
        Self { root, created_at }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
