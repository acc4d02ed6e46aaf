//! The JSON body returned by an upload request.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{tool::ToolKind, worker::Diagnostics};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// A download link was published.
    Succeeded,
    /// Files were accepted but the worker did not produce a result.
    Failed,
    /// The batch never reached the worker.
    Rejected,
}

/// Everything the analyst sees after an upload.
#[derive(Serialize, Debug)]
pub struct ProcessingReport {
    pub tool: ToolKind,
    pub status: ReportStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Workspace file names handed to the worker.
    pub accepted: Vec<String>,
    pub rejected: BTreeMap<String, String>,
    /// Intake warnings (validation and archive expansion).
    pub warnings: Vec<String>,
    /// Classified worker diagnostics.
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

impl ProcessingReport {
    pub fn rejected(tool: ToolKind, message: impl Into<String>) -> Self {
        Self {
            tool,
            status: ReportStatus::Rejected,
            message: message.into(),
            download_url: None,
            accepted: Vec::new(),
            rejected: BTreeMap::new(),
            warnings: Vec::new(),
            diagnostics: Diagnostics::default(),
            stats: None,
        }
    }
}
