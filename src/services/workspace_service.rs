//! WorkspaceManager: allocation and teardown of per-request scratch
//! directories beneath a fixed, pre-provisioned base directory.
//!
//! Every workspace is a direct child of `base_dir` named by 20 random hex
//! characters. Teardown is best-effort and idempotent: individual removal
//! failures are logged and counted, never propagated.

use chrono::Utc;
use std::{
    collections::HashSet,
    fs as std_fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::workspace::Workspace;

/// Random bytes in a workspace name (rendered as 20 hex characters).
const WORKSPACE_NAME_BYTES: usize = 10;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("upload base directory `{0}` does not exist or is not a directory")]
    BaseMissing(PathBuf),
    #[error("upload base directory `{path}` is not writable: {source}")]
    BaseNotWritable { path: PathBuf, source: io::Error },
    #[error("could not create workspace `{path}`: {source}")]
    Create { path: PathBuf, source: io::Error },
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Tally of one teardown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub failures: usize,
}

#[derive(Clone, Debug)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Verify the base directory and create a fresh, randomly named workspace in it.
    pub async fn allocate(&self) -> WorkspaceResult<Workspace> {
        match fs::metadata(&self.base_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(WorkspaceError::BaseMissing(self.base_dir.clone())),
        }
        self.probe_writable().await?;

        let root = self.base_dir.join(random_workspace_name());
        fs::create_dir(&root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.clone(),
                source,
            })?;

        debug!("allocated workspace {}", root.display());
        Ok(Workspace::new(root, Utc::now()))
    }

    /// Write/remove a probe file to prove the base directory accepts writes.
    async fn probe_writable(&self) -> WorkspaceResult<()> {
        let probe = self.base_dir.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"probe")
            .await
            .map_err(|source| WorkspaceError::BaseNotWritable {
                path: self.base_dir.clone(),
                source,
            })?;
        if let Err(err) = fs::remove_file(&probe).await {
            // best-effort cleanup
            warn!("could not remove probe file {}: {}", probe.display(), err);
        }
        Ok(())
    }

    /// Recursively remove a workspace. Safe to call on an already removed one.
    pub async fn destroy(&self, workspace: &Workspace) -> RemovalReport {
        let root = workspace.root().to_path_buf();
        let report = match tokio::task::spawn_blocking(move || remove_tree(&root)).await {
            Ok(report) => report,
            Err(err) => {
                warn!("workspace removal task failed: {}", err);
                RemovalReport {
                    failures: 1,
                    ..RemovalReport::default()
                }
            }
        };
        if report.failures > 0 {
            warn!(
                "workspace {} removed with {} failure(s)",
                workspace.root().display(),
                report.failures
            );
        } else {
            debug!(
                "destroyed workspace {} ({} files, {}s old)",
                workspace.root().display(),
                report.files_removed,
                (Utc::now() - workspace.created_at()).num_seconds()
            );
        }
        report
    }

    /// Remove workspace-shaped directories older than `max_age` that are not in `live`.
    pub async fn sweep_orphans(&self, max_age: Duration, live: &HashSet<PathBuf>) -> usize {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("orphan sweep could not read {}: {}", self.base_dir.display(), err);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_candidate = entry
                .file_name()
                .to_str()
                .is_some_and(is_workspace_name);
            if !is_candidate || live.contains(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if !meta.is_dir() || age < max_age {
                continue;
            }

            let orphan = Workspace::new(path, Utc::now());
            self.destroy(&orphan).await;
            removed += 1;
        }

        if removed > 0 {
            info!("orphan sweep removed {} stale workspace(s)", removed);
        }
        removed
    }
}

/// Owns a freshly allocated workspace until it is either handed off or
/// discarded. Dropping an unreleased lease removes the directory.
#[derive(Debug)]
pub struct WorkspaceLease {
    manager: WorkspaceManager,
    workspace: Workspace,
    armed: bool,
}

impl WorkspaceLease {
    pub fn new(manager: WorkspaceManager, workspace: Workspace) -> Self {
        Self {
            manager,
            workspace,
            armed: true,
        }
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    /// Transfer ownership to the caller; the directory is no longer removed on drop.
    pub fn release(mut self) -> Workspace {
        self.armed = false;
        self.workspace.clone()
    }

    /// Remove the workspace now.
    pub async fn discard(mut self) -> RemovalReport {
        self.armed = false;
        self.manager.destroy(&self.workspace).await
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "workspace {} dropped without release, removing",
                self.workspace.root().display()
            );
            remove_tree(self.workspace.root());
        }
    }
}

/// Depth-first removal of every file and directory below `path`, then `path`.
///
/// Symlinks are unlinked, never followed. Missing paths are a no-op.
pub fn remove_tree(path: &Path) -> RemovalReport {
    let mut report = RemovalReport::default();
    match std_fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_dir_contents(path, &mut report),
        Ok(_) => {
            remove_file_counted(path, &mut report);
            return report;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => return report,
        Err(err) => {
            debug!("cannot stat {}: {}", path.display(), err);
            report.failures += 1;
            return report;
        }
    }

    match std_fs::remove_dir(path) {
        Ok(()) => report.dirs_removed += 1,
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            debug!("failed to remove directory {}: {}", path.display(), err);
            report.failures += 1;
        }
    }
    report
}

fn remove_dir_contents(dir: &Path, report: &mut RemovalReport) {
    let entries = match std_fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("failed to list {}: {}", dir.display(), err);
            report.failures += 1;
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            remove_dir_contents(&path, report);
            match std_fs::remove_dir(&path) {
                Ok(()) => report.dirs_removed += 1,
                Err(err) => {
                    debug!("failed to remove directory {}: {}", path.display(), err);
                    report.failures += 1;
                }
            }
        } else {
            remove_file_counted(&path, report);
        }
    }
}

fn remove_file_counted(path: &Path, report: &mut RemovalReport) {
    match std_fs::remove_file(path) {
        Ok(()) => report.files_removed += 1,
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            debug!("failed to remove file {}: {}", path.display(), err);
            report.failures += 1;
        }
    }
}

fn random_workspace_name() -> String {
    hex::encode(rand::random::<[u8; WORKSPACE_NAME_BYTES]>())
}

/// True for names produced by `random_workspace_name`.
pub fn is_workspace_name(name: &str) -> bool {
    name.len() == WORKSPACE_NAME_BYTES * 2 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as sfs;

    #[tokio::test]
    async fn allocate_creates_random_child_of_base() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path());

        let a = manager.allocate().await.unwrap();
        let b = manager.allocate().await.unwrap();

        assert_ne!(a.root(), b.root());
        for ws in [&a, &b] {
            assert_eq!(ws.root().parent(), Some(base.path()));
            assert!(ws.root().is_dir());
            let name = ws.root().file_name().unwrap().to_str().unwrap();
            assert!(is_workspace_name(name), "{name}");
        }
        // the writability probe leaves nothing behind
        assert_eq!(sfs::read_dir(base.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn allocate_fails_when_base_is_missing() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path().join("absent"));
        let err = manager.allocate().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::BaseMissing(_)));
    }

    #[tokio::test]
    async fn destroy_removes_nested_content_and_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path());
        let ws = manager.allocate().await.unwrap();

        sfs::write(ws.root().join("a.xml"), b"<a/>").unwrap();
        sfs::create_dir_all(ws.root().join("nested/deeper")).unwrap();
        sfs::write(ws.root().join("nested/deeper/b.xml"), b"<b/>").unwrap();

        let first = manager.destroy(&ws).await;
        assert_eq!(first.files_removed, 2);
        assert_eq!(first.dirs_removed, 3);
        assert_eq!(first.failures, 0);
        assert!(!ws.root().exists());

        let second = manager.destroy(&ws).await;
        assert_eq!(second, RemovalReport::default());
    }

    #[tokio::test]
    async fn dropped_lease_removes_workspace() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path());
        let ws = manager.allocate().await.unwrap();
        let root = ws.root().to_path_buf();
        sfs::write(root.join("a.xml"), b"<a/>").unwrap();

        drop(WorkspaceLease::new(manager.clone(), ws));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn released_lease_keeps_workspace() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path());
        let ws = manager.allocate().await.unwrap();

        let kept = WorkspaceLease::new(manager.clone(), ws).release();
        assert!(kept.root().is_dir());
    }

    #[tokio::test]
    async fn sweep_skips_live_young_and_foreign_directories() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path());
        let stale = manager.allocate().await.unwrap();
        let live = manager.allocate().await.unwrap();
        sfs::create_dir(base.path().join("keep-me")).unwrap();

        let live_set: HashSet<PathBuf> = [live.root().to_path_buf()].into_iter().collect();
        let removed = manager.sweep_orphans(Duration::ZERO, &live_set).await;

        assert_eq!(removed, 1);
        assert!(!stale.root().exists());
        assert!(live.root().exists());
        assert!(base.path().join("keep-me").exists());

        let removed = manager
            .sweep_orphans(Duration::from_secs(3600), &HashSet::new())
            .await;
        assert_eq!(removed, 0);
        assert!(live.root().exists());
    }
}
