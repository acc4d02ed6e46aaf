//! Upload validation: extension, size, count and content-sniffing policy over
//! one intake batch. Pure; nothing here touches the filesystem.

use tracing::debug;

use crate::{
    config::UploadLimits,
    models::upload::{BatchRejection, IntakeBatch, UploadItem, ValidationOutcome},
};

/// Extensions accepted at intake.
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["xml", "zip"];

/// Validates batches against a fixed set of ceilings.
#[derive(Clone, Copy, Debug)]
pub struct UploadValidator {
    limits: UploadLimits,
}

impl UploadValidator {
    pub fn new(limits: UploadLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Apply the whole-batch rules, then the per-item rules.
    ///
    /// Returns `Err` only for structural problems that fail the request
    /// outright; per-item problems land in `rejected` or `warnings`.
    pub fn validate(&self, batch: IntakeBatch) -> Result<ValidationOutcome, BatchRejection> {
        let submitted = batch.submitted();
        let mut outcome = ValidationOutcome::default();

        if submitted > self.limits.max_batch_items && !batch.has_archive() {
            return Err(BatchRejection {
                message: format!(
                    "To upload more than {} XML files, bundle them into a ZIP archive and the system will extract them automatically.",
                    self.limits.max_batch_items
                ),
            });
        }

        if !batch.dropped.is_empty() {
            debug!(
                "dropping {} item(s) beyond the per-request ceiling: {:?}",
                batch.dropped.len(),
                batch.dropped
            );
            outcome.warnings.push(format!(
                "{} files were selected, but the server accepts at most {} per upload. The excess files were skipped.",
                submitted, self.limits.max_file_uploads
            ));
        }

        for item in batch.items {
            match self.check_item(&item) {
                ItemCheck::Accept => outcome.accepted.push(item),
                ItemCheck::AcceptWithWarning(warning) => {
                    outcome.warnings.push(warning);
                    outcome.accepted.push(item);
                }
                ItemCheck::Reject(reason) => {
                    outcome.rejected.insert(item.original_name.clone(), reason);
                }
            }
        }

        Ok(outcome)
    }

    /// Per-item rules, first match wins.
    fn check_item(&self, item: &UploadItem) -> ItemCheck {
        if item.transport_error.is_some() || item.size_bytes == 0 {
            return ItemCheck::Reject("Empty or invalid file.".into());
        }

        if !ALLOWED_EXTENSIONS.contains(&item.declared_extension.as_str()) {
            return ItemCheck::Reject(
                "Extension not permitted. Only .xml or .zip files are allowed.".into(),
            );
        }

        let limit = self.size_limit(item);
        if item.size_bytes > limit {
            return ItemCheck::Reject(format!(
                "The file exceeds the {} limit.",
                format_limit(limit)
            ));
        }

        let sniffed = item.sniffed_media_type;
        if item.is_archive() {
            if !is_archive_media_type(sniffed) {
                return ItemCheck::Reject(format!(
                    "ZIP file type not permitted (detected {}).",
                    sniffed
                ));
            }
        } else if !contains_ignore_case(sniffed, "xml") && !contains_ignore_case(sniffed, "text") {
            return ItemCheck::AcceptWithWarning(format!(
                "{} was accepted by its extension, although its detected type is not XML.",
                item.original_name
            ));
        }

        ItemCheck::Accept
    }

    fn size_limit(&self, item: &UploadItem) -> u64 {
        if item.is_archive() {
            self.limits.max_archive_bytes
        } else {
            self.limits.max_file_bytes
        }
    }
}

enum ItemCheck {
    Accept,
    AcceptWithWarning(String),
    Reject(String),
}

/// Sniff a media type from the leading bytes of a payload.
pub fn sniff_media_type(data: &[u8]) -> &'static str {
    if data.is_empty() {
        return "application/x-empty";
    }
    if data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06") || data.starts_with(b"PK\x07\x08")
    {
        return "application/zip";
    }
    if data.starts_with(&[0x1f, 0x8b]) {
        return "application/gzip";
    }
    if data.starts_with(b"7z\xbc\xaf\x27\x1c") {
        return "application/x-7z-compressed";
    }
    if data.starts_with(b"Rar!\x1a\x07") {
        return "application/x-rar-compressed";
    }

    let head = &data[..data.len().min(4096)];
    let head = head.strip_prefix(b"\xef\xbb\xbf").unwrap_or(head);
    let first_visible = head.iter().find(|b| !b.is_ascii_whitespace());
    if first_visible == Some(&b'<') {
        return "text/xml";
    }

    if looks_like_text(head) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    let valid = match std::str::from_utf8(head) {
        Ok(text) => text,
        // A multi-byte sequence cut by the sniff window is still text.
        Err(err) if err.error_len().is_none() => {
            match std::str::from_utf8(&head[..err.valid_up_to()]) {
                Ok(text) => text,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    !valid
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

fn is_archive_media_type(media_type: &str) -> bool {
    ["zip", "compressed", "archive"]
        .iter()
        .any(|family| contains_ignore_case(media_type, family))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(needle)
}

/// Render a byte ceiling the way users read it, e.g. `8MB`.
fn format_limit(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const XML: &[u8] = b"<?xml version=\"1.0\"?><cfdi:Comprobante/>";
    const ZIP_MAGIC: &[u8] = b"PK\x03\x04rest-of-archive";

    fn validator() -> UploadValidator {
        UploadValidator::new(UploadLimits::default())
    }

    fn item(name: &str, data: &'static [u8]) -> UploadItem {
        UploadItem::received(name, Bytes::from_static(data))
    }

    fn sized(name: &str, size: u64, media: &'static str) -> UploadItem {
        let mut item = item(name, b"x");
        item.size_bytes = size;
        item.sniffed_media_type = media;
        item
    }

    fn batch(items: Vec<UploadItem>) -> IntakeBatch {
        IntakeBatch {
            items,
            dropped: Vec::new(),
        }
    }

    #[test]
    fn empty_file_is_rejected_and_valid_one_accepted() {
        let outcome = validator()
            .validate(batch(vec![item("a.xml", b""), item("b.xml", XML)]))
            .unwrap();
        assert_eq!(outcome.rejected["a.xml"], "Empty or invalid file.");
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].original_name, "b.xml");
    }

    #[test]
    fn transport_errors_are_rejected_as_invalid() {
        let outcome = validator()
            .validate(batch(vec![UploadItem::failed("c.xml", "connection reset")]))
            .unwrap();
        assert_eq!(outcome.rejected["c.xml"], "Empty or invalid file.");
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let outcome = validator()
            .validate(batch(vec![item("notes.txt", b"hello")]))
            .unwrap();
        assert!(outcome.rejected["notes.txt"].contains("Extension not permitted"));
        assert!(outcome.accepted.is_empty());
    }

    #[test]
    fn oversize_messages_name_the_extension_specific_limit() {
        let limits = UploadLimits::default();
        let outcome = validator()
            .validate(batch(vec![
                sized("big.xml", limits.max_file_bytes + 1, "text/xml"),
                sized("big.zip", limits.max_archive_bytes + 1, "application/zip"),
                sized("ok.zip", limits.max_file_bytes + 1, "application/zip"),
            ]))
            .unwrap();
        assert_eq!(outcome.rejected["big.xml"], "The file exceeds the 8MB limit.");
        assert_eq!(outcome.rejected["big.zip"], "The file exceeds the 50MB limit.");
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn exact_limit_is_accepted() {
        let limits = UploadLimits::default();
        let outcome = validator()
            .validate(batch(vec![sized("edge.xml", limits.max_file_bytes, "text/xml")]))
            .unwrap();
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn archive_with_foreign_content_is_rejected() {
        let outcome = validator()
            .validate(batch(vec![item("fake.zip", b"<html>not a zip</html>")]))
            .unwrap();
        assert!(outcome.rejected["fake.zip"].starts_with("ZIP file type not permitted"));
    }

    #[test]
    fn plain_item_with_odd_content_is_accepted_with_warning() {
        let outcome = validator()
            .validate(batch(vec![item("odd.xml", b"\x00\x01\x02binary")]))
            .unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("odd.xml was accepted"));
    }

    #[test]
    fn large_batch_without_archive_fails_fast() {
        let items = (0..501).map(|i| sized(&format!("{i}.xml"), 10, "text/xml")).collect();
        let err = validator().validate(batch(items)).unwrap_err();
        assert!(err.message.contains("bundle them into a ZIP archive"));
    }

    #[test]
    fn large_batch_with_archive_proceeds() {
        let mut items: Vec<_> = (0..500).map(|i| sized(&format!("{i}.xml"), 10, "text/xml")).collect();
        items.push(item("bundle.zip", ZIP_MAGIC));
        let outcome = validator().validate(batch(items)).unwrap();
        assert_eq!(outcome.accepted.len(), 501);
    }

    #[test]
    fn dropped_items_produce_a_batch_warning() {
        let outcome = validator()
            .validate(IntakeBatch {
                items: vec![item("a.xml", XML)],
                dropped: vec!["b.xml".into(), "c.xml".into()],
            })
            .unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert!(outcome.warnings[0].starts_with("3 files were selected"));
    }

    #[test]
    fn sniffing_recognizes_common_payloads() {
        assert_eq!(sniff_media_type(b""), "application/x-empty");
        assert_eq!(sniff_media_type(ZIP_MAGIC), "application/zip");
        assert_eq!(sniff_media_type(b"PK\x05\x06"), "application/zip");
        assert_eq!(sniff_media_type(b"\x1f\x8b\x08\x00"), "application/gzip");
        assert_eq!(sniff_media_type(XML), "text/xml");
        assert_eq!(sniff_media_type(b"\xef\xbb\xbf\n  <root/>"), "text/xml");
        assert_eq!(sniff_media_type(b"plain words"), "text/plain");
        assert_eq!(sniff_media_type(b"\x00\xff\xfe"), "application/octet-stream");
    }

    #[test]
    fn limits_render_in_familiar_units() {
        assert_eq!(format_limit(8 * 1024 * 1024), "8MB");
        assert_eq!(format_limit(512 * 1024), "512KB");
        assert_eq!(format_limit(1000), "1000 bytes");
    }
}
