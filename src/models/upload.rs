//! Intake models: the raw items received by the upload endpoint and the
//! outcome of validating them.

use bytes::Bytes;
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};

/// One file received in a multipart upload. Exists only during intake.
#[derive(Clone, Debug)]
pub struct UploadItem {
    /// Name as sent by the client, path components stripped.
    pub original_name: String,
    pub size_bytes: u64,
    /// Lowercased extension without the dot; empty when the name has none.
    pub declared_extension: String,
    /// Media type sniffed from the leading bytes.
    pub sniffed_media_type: &'static str,
    /// Set when the transport failed to deliver the item's body.
    pub transport_error: Option<String>,
    pub data: Bytes,
}

impl UploadItem {
    /// Build an item from a received field body.
    pub fn received(name: &str, data: Bytes) -> Self {
        let original_name = client_base_name(name);
        Self {
            declared_extension: declared_extension(&original_name),
            sniffed_media_type: crate::services::validation_service::sniff_media_type(&data),
            size_bytes: data.len() as u64,
            original_name,
            transport_error: None,
            data,
        }
    }

    /// Build an item whose body could not be read.
    pub fn failed(name: &str, reason: impl Into<String>) -> Self {
        let original_name = client_base_name(name);
        Self {
            declared_extension: declared_extension(&original_name),
            sniffed_media_type: "application/x-empty",
            size_bytes: 0,
            original_name,
            transport_error: Some(reason.into()),
            data: Bytes::new(),
        }
    }

    pub fn is_archive(&self) -> bool {
        self.declared_extension == "zip"
    }
}

/// Everything the transport delivered for one request.
#[derive(Clone, Debug, Default)]
pub struct IntakeBatch {
    /// Items whose bodies were received, in submission order.
    pub items: Vec<UploadItem>,
    /// Names of items beyond the per-request ceiling; their bodies were not read.
    pub dropped: Vec<String>,
}

impl IntakeBatch {
    /// Number of items the client submitted, including dropped ones.
    pub fn submitted(&self) -> usize {
        self.items.len() + self.dropped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted() == 0
    }

    /// True when any submitted name, received or dropped, is an archive.
    pub fn has_archive(&self) -> bool {
        self.items.iter().any(UploadItem::is_archive)
            || self.dropped.iter().any(|name| declared_extension(name) == "zip")
    }
}

/// Result of validating one batch. Built once per request.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<UploadItem>,
    pub rejected: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// A structural problem that fails the whole batch before any item is looked at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct BatchRejection {
    pub message: String,
}

fn client_base_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

pub(crate) fn declared_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}
