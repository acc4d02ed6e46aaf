//! Shared fixtures for pipeline and router tests.

use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

use crate::{
    config::UploadLimits,
    models::{
        tool::ToolKind,
        worker::{Invocation, WorkerOutput},
    },
    services::{
        download_service::DownloadBroker,
        pipeline_service::PipelineService,
        session_store::SessionStore,
        worker_service::DocumentWorker,
        workspace_service::WorkspaceManager,
    },
};

/// What the fake does once it has looked at the workspace.
#[derive(Clone, Debug)]
pub enum Script {
    /// Write `result<ext>` into the workspace and print its absolute path.
    Produce { stderr: String },
    /// Exit with `status`, printing `stderr` on the diagnostics channel.
    Fail { status: i32, stderr: String },
    /// Never complete: report `Invocation::SpawnFailed` or `TimedOut`.
    Abort(Invocation),
}

/// One observed invocation.
#[derive(Clone, Debug)]
pub struct SeenRun {
    pub workspace: PathBuf,
    /// Sorted file names present when the worker started.
    pub files: Vec<String>,
}

/// In-process `DocumentWorker` driven by a fixed script.
#[derive(Clone, Debug)]
pub struct ScriptedWorker {
    script: Script,
    runs: Arc<Mutex<Vec<SeenRun>>>,
}

impl ScriptedWorker {
    pub fn producing() -> Self {
        Self::new(Script::Produce {
            stderr: String::new(),
        })
    }

    pub fn failing(status: i32, stderr: &str) -> Self {
        Self::new(Script::Fail {
            status,
            stderr: stderr.into(),
        })
    }

    pub fn unstartable() -> Self {
        Self::new(Script::Abort(Invocation::SpawnFailed))
    }

    pub fn timing_out() -> Self {
        Self::new(Script::Abort(Invocation::TimedOut))
    }

    pub fn new(script: Script) -> Self {
        Self {
            script,
            runs: Arc::default(),
        }
    }

    pub fn runs(&self) -> Vec<SeenRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentWorker for ScriptedWorker {
    async fn run(&self, tool: ToolKind, workspace: &Path) -> WorkerOutput {
        let mut files: Vec<String> = std::fs::read_dir(workspace)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        self.runs.lock().unwrap().push(SeenRun {
            workspace: workspace.to_path_buf(),
            files,
        });

        match &self.script {
            Script::Produce { stderr } => {
                let out = workspace.join(format!("result{}", tool.output_extension()));
                std::fs::write(&out, b"artifact-bytes").unwrap();
                WorkerOutput::completed(0, format!("{}\n", out.display()), stderr.clone())
            }
            Script::Fail { status, stderr } => {
                WorkerOutput::completed(*status, String::new(), stderr.clone())
            }
            Script::Abort(invocation) => WorkerOutput {
                invocation: invocation.clone(),
                stdout: String::new(),
                stderr: "FATAL: worker did not complete".into(),
            },
        }
    }
}

/// A pipeline over a scratch upload root.
pub struct Harness {
    pub base: TempDir,
    pub worker: ScriptedWorker,
    pub service: PipelineService,
}

pub fn harness(worker: ScriptedWorker) -> Harness {
    harness_with_limits(worker, UploadLimits::default())
}

pub fn harness_with_limits(worker: ScriptedWorker, limits: UploadLimits) -> Harness {
    let base = tempfile::tempdir().unwrap();
    let workspaces = WorkspaceManager::new(base.path());
    let broker = DownloadBroker::new(SessionStore::new(), workspaces.clone(), base.path()).unwrap();
    let service = PipelineService::new(limits, workspaces, Arc::new(worker.clone()), broker);
    Harness {
        base,
        worker,
        service,
    }
}

/// Names of the entries left under the upload root.
pub fn leftover_entries(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
