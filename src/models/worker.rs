//! Worker protocol models: what came back from the process, and what it means.

use serde::Serialize;
use std::path::PathBuf;

/// How the worker invocation ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invocation {
    /// The process ran to completion. `-1` when it was terminated by a signal.
    Completed { status: i32 },
    /// The process could not be started at all.
    SpawnFailed,
    /// The process exceeded the configured wait and was killed.
    TimedOut,
}

/// Raw capture of one worker run.
#[derive(Clone, Debug)]
pub struct WorkerOutput {
    pub invocation: Invocation,
    pub stdout: String,
    pub stderr: String,
}

impl WorkerOutput {
    pub fn completed(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            invocation: Invocation::Completed { status },
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Exit status as the pipeline sees it; invocation errors map to `2`.
    pub fn exit_status(&self) -> i32 {
        match self.invocation {
            Invocation::Completed { status } => status,
            Invocation::SpawnFailed | Invocation::TimedOut => 2,
        }
    }
}

/// The worker's diagnostics channel partitioned by severity.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub fatals: Vec<String>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty() && self.fatals.is_empty()
    }
}

/// Decoded outcome of one worker run. Derived, never persisted.
#[derive(Clone, Debug)]
pub struct WorkerResult {
    pub invocation: Invocation,
    pub exit_status: i32,
    pub result_path: Option<PathBuf>,
    /// Optional statistics record printed alongside the result path.
    pub stats: Option<serde_json::Value>,
    pub diagnostics: Diagnostics,
    pub missing_dependency: bool,
}

/// Final classification of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Exit `0` with a result path that exists on disk.
    Succeeded(PathBuf),
    /// Exit `0` but no usable result path.
    NoOutput,
    /// Diagnostics name an interpreter-level import failure.
    MissingDependency,
    /// Exit `1`: the worker recognized a problem with the documents.
    ProcessingFailed,
    /// Exit `2` or above, or a signal.
    UnexpectedExit,
    SpawnFailed,
    TimedOut,
}
