//! Represents a published, not yet redeemed, download.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::models::{tool::ToolKind, workspace::Workspace};

/// A pending single-use download. Owns its workspace until redeemed or until
/// the owning session ends.
#[derive(Clone, Debug)]
pub struct DownloadEntry {
    /// 32 hex characters (16 random bytes).
    pub token: String,
    pub result_path: PathBuf,
    pub workspace: Workspace,
    pub tool: ToolKind,
    pub published_at: DateTime<Utc>,
}
