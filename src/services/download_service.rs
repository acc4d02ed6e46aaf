//! DownloadBroker publishes worker results behind opaque single-use tokens
//! and redeems them exactly once within the issuing session.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, info, warn};

use crate::{
    models::{download::DownloadEntry, tool::ToolKind, workspace::Workspace},
    services::{
        session_store::{SessionId, SessionStore},
        workspace_service::WorkspaceManager,
    },
};

/// Random bytes in a download token (rendered as 32 hex characters).
const TOKEN_BYTES: usize = 16;

/// An artifact ready to stream. The open handle stays readable after the
/// workspace holding it has been removed.
#[derive(Debug)]
pub struct Redemption {
    pub file: File,
    pub len: u64,
    pub content_type: &'static str,
    pub filename: &'static str,
}

#[derive(Clone, Debug)]
pub struct DownloadBroker {
    sessions: SessionStore,
    workspaces: WorkspaceManager,
    /// Canonical upload root every redeemed path must live under.
    upload_root: PathBuf,
}

impl DownloadBroker {
    /// `upload_root` must already exist; it is canonicalized once here.
    pub fn new(
        sessions: SessionStore,
        workspaces: WorkspaceManager,
        upload_root: &Path,
    ) -> std::io::Result<Self> {
        Ok(Self {
            sessions,
            workspaces,
            upload_root: std::fs::canonicalize(upload_root)?,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Record a pending download and return its token.
    ///
    /// When the session has vanished in the meantime the workspace is
    /// destroyed and `None` is returned.
    pub async fn publish(
        &self,
        session: SessionId,
        tool: ToolKind,
        result_path: PathBuf,
        workspace: Workspace,
    ) -> Option<String> {
        let token = hex::encode(rand::random::<[u8; TOKEN_BYTES]>());
        let entry = DownloadEntry {
            token: token.clone(),
            result_path,
            workspace,
            tool,
            published_at: Utc::now(),
        };

        match self.sessions.insert_download(session, entry).await {
            Ok(()) => {
                debug!("published download for session {}", session);
                Some(token)
            }
            Err(entry) => {
                warn!("session {} ended before publish, discarding result", session);
                self.workspaces.destroy(&entry.workspace).await;
                None
            }
        }
    }

    /// Redeem `raw_token` for `session`.
    ///
    /// A miss (unknown, foreign, or already used token) returns `None` and
    /// touches nothing. A hit always removes the entry and destroys its
    /// workspace, whether or not the artifact could be opened.
    pub async fn redeem(&self, session: SessionId, raw_token: &str) -> Option<Redemption> {
        let token = sanitize_token(raw_token);
        if token.is_empty() {
            return None;
        }
        let entry = self.sessions.take_download(session, &token).await?;

        let opened = self
            .open_confined(&entry.result_path, entry.workspace.root())
            .await;
        self.workspaces.destroy(&entry.workspace).await;

        match opened {
            Some((file, len)) => {
                info!(
                    "redeemed {} download ({} bytes, published {}s earlier)",
                    entry.tool,
                    len,
                    (Utc::now() - entry.published_at).num_seconds()
                );
                Some(Redemption {
                    file,
                    len,
                    content_type: entry.tool.content_type(),
                    filename: entry.tool.download_name(),
                })
            }
            None => None,
        }
    }

    /// Open `path` only if its canonical form lies under the upload root
    /// and inside the workspace that produced it.
    async fn open_confined(&self, path: &Path, workspace_root: &Path) -> Option<(File, u64)> {
        let resolved = match fs::canonicalize(path).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("download denied, {} does not resolve: {}", path.display(), err);
                return None;
            }
        };
        let workspace_root = match fs::canonicalize(workspace_root).await {
            Ok(root) => root,
            Err(err) => {
                warn!("download denied, workspace {} is gone: {}", workspace_root.display(), err);
                return None;
            }
        };
        for root in [&self.upload_root, &workspace_root] {
            if !resolved.starts_with(root) {
                warn!("download denied, {} is outside {}", resolved.display(), root.display());
                return None;
            }
        }

        let file = match File::open(&resolved).await {
            Ok(file) => file,
            Err(err) => {
                warn!("download denied, cannot open {}: {}", resolved.display(), err);
                return None;
            }
        };
        match file.metadata().await {
            Ok(meta) if meta.is_file() => Some((file, meta.len())),
            Ok(_) => {
                warn!("download denied, {} is not a regular file", resolved.display());
                None
            }
            Err(err) => {
                warn!("download denied, cannot stat {}: {}", resolved.display(), err);
                None
            }
        }
    }

    /// End sessions idle past `ttl` and destroy the workspaces they owned.
    pub async fn expire_sessions(&self, ttl: std::time::Duration) -> usize {
        let abandoned = self.sessions.expire_idle(ttl).await;
        for entry in &abandoned {
            self.workspaces.destroy(&entry.workspace).await;
        }
        if !abandoned.is_empty() {
            info!("expired {} unredeemed download(s)", abandoned.len());
        }
        abandoned.len()
    }
}

/// Keep only ASCII alphanumerics.
pub fn sanitize_token(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}
