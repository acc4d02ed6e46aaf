//! PipelineService: one request's path from intake batch to processing
//! report: validate, stage into a fresh workspace, expand archives, run the
//! worker, classify the run, and publish or discard the result.

use std::{path::Path, sync::Arc, time::Duration};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::{
    config::UploadLimits,
    models::{
        report::{ProcessingReport, ReportStatus},
        tool::{MISSING_DEPENDENCY_MESSAGE, TIMEOUT_MESSAGE, ToolKind},
        upload::{IntakeBatch, UploadItem},
        worker::{Verdict, WorkerResult},
    },
    services::{
        archive_service::{ArchiveError, ArchiveExpander, ExpansionBudget},
        download_service::{DownloadBroker, Redemption},
        sanitize::{sanitize_filename, unique_destination},
        session_store::{SessionId, SessionStore},
        validation_service::UploadValidator,
        worker_service::{DocumentWorker, decode, verdict},
        workspace_service::{WorkspaceLease, WorkspaceManager, WorkspaceResult},
    },
};

const DOCUMENT_EXTENSION: &str = ".xml";
const NOTHING_VALID: &str = "No valid files were uploaded.";
const ARCHIVE_UNREADABLE: &str = "The ZIP file could not be opened.";
const SAVE_FAILED: &str = "Could not save the file. Try again.";

/// Shared router state. Cheap to clone; every field is a handle.
#[derive(Clone)]
pub struct PipelineService {
    validator: UploadValidator,
    expander: ArchiveExpander,
    workspaces: WorkspaceManager,
    worker: Arc<dyn DocumentWorker>,
    broker: DownloadBroker,
}

impl PipelineService {
    pub fn new(
        limits: UploadLimits,
        workspaces: WorkspaceManager,
        worker: Arc<dyn DocumentWorker>,
        broker: DownloadBroker,
    ) -> Self {
        Self {
            validator: UploadValidator::new(limits),
            expander: ArchiveExpander::new(DOCUMENT_EXTENSION, limits.max_file_bytes),
            workspaces,
            worker,
            broker,
        }
    }

    pub fn limits(&self) -> UploadLimits {
        self.validator.limits()
    }

    pub fn sessions(&self) -> &SessionStore {
        self.broker.sessions()
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn worker(&self) -> &dyn DocumentWorker {
        self.worker.as_ref()
    }

    pub async fn redeem(&self, session: SessionId, token: &str) -> Option<Redemption> {
        self.broker.redeem(session, token).await
    }

    /// Run one batch for `tool` on behalf of `session`.
    ///
    /// Only workspace setup failures are returned as `Err`; every other
    /// outcome is described by the report.
    pub async fn process(
        &self,
        tool: ToolKind,
        session: SessionId,
        batch: IntakeBatch,
    ) -> WorkspaceResult<ProcessingReport> {
        let outcome = match self.validator.validate(batch) {
            Ok(outcome) => outcome,
            Err(rejection) => {
                info!("{} batch rejected: {}", tool, rejection);
                return Ok(ProcessingReport::rejected(tool, rejection.message));
            }
        };

        let mut report = ProcessingReport::rejected(tool, NOTHING_VALID);
        report.rejected = outcome.rejected;
        report.warnings = outcome.warnings;
        if outcome.accepted.is_empty() {
            return Ok(report);
        }

        let lease = WorkspaceLease::new(self.workspaces.clone(), self.workspaces.allocate().await?);
        let limits = self.limits();
        let mut budget = ExpansionBudget::new(limits.max_expanded_bytes, limits.max_batch_items);
        for item in &outcome.accepted {
            self.stage(item, &lease, &mut budget, &mut report).await;
        }
        if report.accepted.is_empty() {
            lease.discard().await;
            return Ok(report);
        }

        debug!(
            "running {} worker on {} file(s) in {}",
            tool,
            report.accepted.len(),
            lease.root().display()
        );
        let output = self.worker.run(tool, lease.root()).await;
        if !output.stderr.trim().is_empty() {
            debug!("{} worker diagnostics:\n{}", tool, output.stderr);
        }

        let mut result = decode(tool, output);
        if let Some(path) = result.result_path.as_mut() {
            if path.is_relative() {
                *path = lease.root().join(&*path);
            }
        }
        let outcome = verdict(&result).await;
        self.finish(tool, session, lease, result, outcome, report).await
    }

    /// Write one accepted item into the workspace, expanding archives
    /// against what is left of the batch's `budget`.
    async fn stage(
        &self,
        item: &UploadItem,
        lease: &WorkspaceLease,
        budget: &mut ExpansionBudget,
        report: &mut ProcessingReport,
    ) {
        let root = lease.root().to_path_buf();
        let name = sanitize_filename(&item.original_name);
        let picked = tokio::task::spawn_blocking(move || unique_destination(&root, &name)).await;
        let target = match picked {
            Ok(target) => target,
            Err(err) => {
                error!("could not pick a name for {}: {}", item.original_name, err);
                report
                    .rejected
                    .insert(item.original_name.clone(), SAVE_FAILED.into());
                return;
            }
        };
        if let Err(err) = fs::write(&target, &item.data).await {
            error!("could not save {} to {}: {}", item.original_name, target.display(), err);
            report
                .rejected
                .insert(item.original_name.clone(), SAVE_FAILED.into());
            return;
        }

        if !item.is_archive() {
            report.accepted.push(file_name(&target));
            return;
        }

        let expansion = self
            .expander
            .expand_in(target.clone(), lease.root().to_path_buf(), *budget)
            .await;
        if let Err(err) = fs::remove_file(&target).await {
            warn!("could not remove archive {}: {}", target.display(), err);
        }

        match expansion {
            Ok(expansion) => {
                *budget = expansion.remaining;
                info!(
                    "extracted {} document(s) from {}",
                    expansion.extracted.len(),
                    item.original_name
                );
                report
                    .accepted
                    .extend(expansion.extracted.iter().map(|path| file_name(path)));
                report.warnings.extend(expansion.warnings);
            }
            Err(err @ ArchiveError::Open { .. }) => {
                warn!("{}", err);
                report
                    .rejected
                    .insert(item.original_name.clone(), ARCHIVE_UNREADABLE.into());
            }
            Err(err) => {
                error!("{}", err);
                report
                    .rejected
                    .insert(item.original_name.clone(), ARCHIVE_UNREADABLE.into());
            }
        }
    }

    async fn finish(
        &self,
        tool: ToolKind,
        session: SessionId,
        lease: WorkspaceLease,
        result: WorkerResult,
        outcome: Verdict,
        mut report: ProcessingReport,
    ) -> WorkspaceResult<ProcessingReport> {
        report.stats = result.stats;
        report.diagnostics = result.diagnostics;

        let path = match outcome {
            Verdict::Succeeded(path) => path,
            failure => {
                lease.discard().await;
                report.status = ReportStatus::Failed;
                report.message = failure_message(tool, &failure).into();
                warn!(
                    "{} worker failed ({:?}, exit status {})",
                    tool, failure, result.exit_status
                );
                return Ok(report);
            }
        };

        let workspace = lease.release();
        match self.broker.publish(session, tool, path, workspace).await {
            Some(token) => {
                report.status = ReportStatus::Succeeded;
                report.message = tool
                    .success_message(!report.diagnostics.is_empty())
                    .into();
                report.download_url = Some(download_url(tool, &token));
                info!("{} result published", tool);
            }
            None => {
                report.status = ReportStatus::Failed;
                report.message = tool.generic_failure_message().into();
            }
        }
        Ok(report)
    }

    /// Expire idle sessions, then remove workspaces nothing owns any more.
    pub async fn run_sweep(&self, session_ttl: Duration, orphan_max_age: Duration) {
        let expired = self.broker.expire_sessions(session_ttl).await;
        let live = self.sessions().live_workspaces().await;
        let orphans = self.workspaces.sweep_orphans(orphan_max_age, &live).await;
        debug!(
            "sweep finished: {} expired download(s), {} orphan(s), {} live session(s)",
            expired,
            orphans,
            self.sessions().len().await
        );
    }
}

fn failure_message(tool: ToolKind, verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::MissingDependency => MISSING_DEPENDENCY_MESSAGE,
        Verdict::TimedOut => TIMEOUT_MESSAGE,
        Verdict::ProcessingFailed => tool.processing_failure_message(),
        _ => tool.generic_failure_message(),
    }
}

pub fn download_url(tool: ToolKind, token: &str) -> String {
    format!("/tools/{}?download={}", tool.slug(), token)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
