//! Worker invocation protocol.
//!
//! The external worker is launched as `<interpreter> <script> <workspace>`,
//! with stdin closed and both output channels captured whole. Its stdout
//! names the result file, either as a JSON record or as plain text; its
//! stderr carries severity-tagged diagnostics; its exit status decides
//! success. Everything about that text protocol lives here so a different
//! `DocumentWorker` can replace the process without touching the pipeline.

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::{
    models::{
        tool::ToolKind,
        worker::{Invocation, Verdict, WorkerOutput, WorkerResult},
    },
    services::diagnostics::{classify, detect_missing_dependency},
};

/// How long the readiness check waits for `<interpreter> --version`.
const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that turns a workspace full of documents into one artifact.
#[async_trait]
pub trait DocumentWorker: Send + Sync {
    async fn run(&self, tool: ToolKind, workspace: &Path) -> WorkerOutput;

    /// Confirm the worker could be started right now. `Ok` carries a short
    /// description for the readiness report.
    async fn check_ready(&self) -> Result<String, String> {
        Ok("in-process".into())
    }
}

/// Runs the tool's script under an interpreter as a child process.
#[derive(Clone, Debug)]
pub struct ProcessWorker {
    interpreter: String,
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl ProcessWorker {
    pub fn new(interpreter: impl Into<String>, scripts_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            scripts_dir: scripts_dir.into(),
            timeout,
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    async fn script_path(&self, tool: ToolKind) -> PathBuf {
        let script = self.scripts_dir.join(tool.script());
        tokio::fs::canonicalize(&script).await.unwrap_or(script)
    }
}

#[async_trait]
impl DocumentWorker for ProcessWorker {
    async fn run(&self, tool: ToolKind, workspace: &Path) -> WorkerOutput {
        let script = self.script_path(tool).await;
        debug!(
            "launching {} {} {}",
            self.interpreter,
            script.display(),
            workspace.display()
        );

        let child = Command::new(&self.interpreter)
            .arg(&script)
            .arg(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => WorkerOutput::completed(
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ),
            Ok(Err(err)) => {
                error!("could not start worker {}: {}", self.interpreter, err);
                WorkerOutput {
                    invocation: Invocation::SpawnFailed,
                    stdout: String::new(),
                    stderr: format!("FATAL: could not start the worker process: {}", err),
                }
            }
            Err(_) => {
                error!(
                    "worker for {} exceeded {:?} on {}",
                    tool,
                    self.timeout,
                    workspace.display()
                );
                WorkerOutput {
                    invocation: Invocation::TimedOut,
                    stdout: String::new(),
                    stderr: format!(
                        "FATAL: the worker did not finish within {} seconds",
                        self.timeout.as_secs()
                    ),
                }
            }
        }
    }

    async fn check_ready(&self) -> Result<String, String> {
        let probe = Command::new(&self.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(READINESS_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => {
                // some interpreters print their version on stderr
                let text = if output.stdout.is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                Ok(String::from_utf8_lossy(&text).trim().to_string())
            }
            Ok(Ok(output)) => Err(format!(
                "{} --version exited with {}",
                self.interpreter, output.status
            )),
            Ok(Err(err)) => Err(format!("could not start {}: {}", self.interpreter, err)),
            Err(_) => Err(format!(
                "{} --version did not answer within {} seconds",
                self.interpreter,
                READINESS_TIMEOUT.as_secs()
            )),
        }
    }
}

/// Decode a raw capture into a `WorkerResult`.
pub fn decode(tool: ToolKind, output: WorkerOutput) -> WorkerResult {
    let extension = tool.output_extension();
    let (record_path, stats) = parse_record(&output.stdout, extension);
    let result_path = record_path
        .or_else(|| scan_for_path(&output.stdout, extension))
        .or_else(|| last_line_path(&output.stdout, extension));

    WorkerResult {
        exit_status: output.exit_status(),
        result_path: result_path.map(PathBuf::from),
        stats,
        diagnostics: classify(&output.stderr),
        missing_dependency: detect_missing_dependency(&output.stderr),
        invocation: output.invocation,
    }
}

/// Classify a decoded run. The exit status is authoritative.
pub async fn verdict(result: &WorkerResult) -> Verdict {
    match result.invocation {
        Invocation::SpawnFailed => return Verdict::SpawnFailed,
        Invocation::TimedOut => return Verdict::TimedOut,
        Invocation::Completed { .. } => {}
    }

    if result.exit_status == 0 {
        if let Some(path) = &result.result_path {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => return Verdict::Succeeded(path.clone()),
                _ => warn!("worker reported {} but it is not a file", path.display()),
            }
        }
    }

    if result.missing_dependency {
        Verdict::MissingDependency
    } else if result.exit_status == 0 {
        Verdict::NoOutput
    } else if result.exit_status == 1 {
        Verdict::ProcessingFailed
    } else {
        Verdict::UnexpectedExit
    }
}

/// Structured form: a JSON object naming the result in `path` or `file`,
/// directly or inside a nested `success`/`result` record.
///
/// Also returns the optional `stats` record printed next to the path.
fn parse_record(stdout: &str, extension: &str) -> (Option<String>, Option<Value>) {
    let Ok(value) = serde_json::from_str::<Value>(stdout.trim()) else {
        return (None, None);
    };
    let Some(object) = value.as_object() else {
        return (None, None);
    };
    let stats = object.get("stats").filter(|s| !s.is_null()).cloned();

    let path_in = |record: &Value| {
        ["path", "file"]
            .iter()
            .filter_map(|key| record.get(*key).and_then(Value::as_str))
            .find(|candidate| ends_with_ignore_case(candidate, extension))
            .map(str::to_string)
    };

    let path = path_in(&value).or_else(|| {
        ["success", "result"]
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(path_in)
    });

    (path, stats)
}

/// Last absolute-path-looking token ending in `extension`.
fn scan_for_path(stdout: &str, extension: &str) -> Option<String> {
    let pattern = format!(r"(/[^\s]+{})", regex::escape(extension));
    let re = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re,
        Err(err) => {
            warn!("invalid result path pattern {}: {}", pattern, err);
            return None;
        }
    };
    re.find_iter(stdout)
        .last()
        .map(|m| m.as_str().trim().to_string())
}

/// Last non-blank line, when it ends in `extension`.
fn last_line_path(stdout: &str, extension: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .filter(|line| ends_with_ignore_case(line, extension))
        .map(str::to_string)
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value
            .get(value.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}
