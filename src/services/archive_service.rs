//! Archive expansion: pull document entries out of an uploaded ZIP bundle
//! into a workspace, flattening every entry to a sanitized base name.

use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::services::sanitize::{sanitize_filename, unique_destination};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("could not open archive `{path}`: {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("archive expansion task failed: {0}")]
    Task(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// What a batch may still write through archive expansion. Shared by every
/// archive of one batch so that many small bundles cannot add up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpansionBudget {
    /// Decompressed bytes left.
    pub bytes: u64,
    /// Documents left.
    pub entries: usize,
}

impl ExpansionBudget {
    pub fn new(bytes: u64, entries: usize) -> Self {
        Self { bytes, entries }
    }

    fn spend(&mut self, bytes: u64) {
        self.bytes = self.bytes.saturating_sub(bytes);
        self.entries = self.entries.saturating_sub(1);
    }

    fn covers(&self, declared_size: u64) -> bool {
        self.entries > 0 && declared_size <= self.bytes
    }
}

/// Files extracted from one archive plus the non-fatal problems met on the way.
#[derive(Debug)]
pub struct Expansion {
    pub extracted: Vec<PathBuf>,
    pub warnings: Vec<String>,
    /// Budget left after this archive.
    pub remaining: ExpansionBudget,
}

#[derive(Clone, Copy, Debug)]
pub struct ArchiveExpander {
    /// Extension (with dot) an entry must end in to be extracted.
    document_extension: &'static str,
    /// Largest decompressed entry accepted.
    max_entry_bytes: u64,
}

impl ArchiveExpander {
    pub fn new(document_extension: &'static str, max_entry_bytes: u64) -> Self {
        Self {
            document_extension,
            max_entry_bytes,
        }
    }

    /// Expand on the blocking pool.
    pub async fn expand_in(
        &self,
        archive: PathBuf,
        dest: PathBuf,
        budget: ExpansionBudget,
    ) -> ArchiveResult<Expansion> {
        let expander = *self;
        tokio::task::spawn_blocking(move || expander.expand(&archive, &dest, budget))
            .await
            .map_err(|err| ArchiveError::Task(err.to_string()))?
    }

    /// Extract every document entry of `archive` into `dest`.
    ///
    /// Directory entries and entries with other extensions are skipped
    /// silently. Unreadable or unwritable entries are skipped with a warning.
    /// Extraction stops once `budget` runs out; what was extracted up to that
    /// point stays.
    pub fn expand(
        &self,
        archive: &Path,
        dest: &Path,
        budget: ExpansionBudget,
    ) -> ArchiveResult<Expansion> {
        let open_err = |reason: String| ArchiveError::Open {
            path: archive.to_path_buf(),
            reason,
        };
        let file = File::open(archive).map_err(|err| open_err(err.to_string()))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|err| open_err(err.to_string()))?;

        let mut expansion = Expansion {
            extracted: Vec::new(),
            warnings: Vec::new(),
            remaining: budget,
        };
        let mut exhausted = false;
        for index in 0..zip.len() {
            let mut entry = match zip.by_index(index) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("unreadable entry #{} in {}: {}", index, archive.display(), err);
                    expansion
                        .warnings
                        .push(format!("Entry #{} of the ZIP could not be read.", index + 1));
                    continue;
                }
            };

            let name = entry.name().to_string();
            if entry.is_dir() || name.ends_with('/') || !self.is_document(&name) {
                debug!("skipping archive entry {}", name);
                continue;
            }

            let base_name = sanitize_filename(&name);
            if entry.size() > self.max_entry_bytes {
                expansion.warnings.push(format!(
                    "{} was skipped because it is larger than the per-file limit.",
                    base_name
                ));
                continue;
            }
            if !expansion.remaining.covers(entry.size()) {
                warn!(
                    "expansion budget of {} spent at entry #{} ({} bytes, {} documents left)",
                    archive.display(),
                    index,
                    expansion.remaining.bytes,
                    expansion.remaining.entries
                );
                expansion.warnings.push(format!(
                    "Extraction stopped at {}: the ZIP expands past the allowed total size or number of documents. The remaining entries were skipped.",
                    base_name
                ));
                exhausted = true;
                break;
            }

            let target = unique_destination(dest, &base_name);
            let cap = self.max_entry_bytes.min(expansion.remaining.bytes);
            match copy_entry(&mut entry, &target, cap) {
                Ok(bytes) => {
                    debug!("extracted {} ({} bytes) to {}", name, bytes, target.display());
                    expansion.remaining.spend(bytes);
                    expansion.extracted.push(target);
                }
                Err(err) => {
                    warn!("could not extract {} from {}: {}", name, archive.display(), err);
                    expansion
                        .warnings
                        .push(format!("{} could not be extracted from the ZIP.", base_name));
                }
            }
        }

        if expansion.extracted.is_empty() && !exhausted {
            expansion
                .warnings
                .push("The ZIP file does not contain valid XML documents.".into());
        }
        Ok(expansion)
    }

    fn is_document(&self, name: &str) -> bool {
        name.to_ascii_lowercase().ends_with(self.document_extension)
    }
}

/// Stream an entry to `target`, refusing to write more than `cap` bytes.
/// On any failure the partial file is removed.
fn copy_entry(entry: &mut impl Read, target: &Path, cap: u64) -> io::Result<u64> {
    let copied = write_capped(entry, target, cap);
    if copied.is_err() {
        match std::fs::remove_file(target) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("could not remove partial {}: {}", target.display(), err),
        }
    }
    copied
}

fn write_capped(entry: &mut impl Read, target: &Path, cap: u64) -> io::Result<u64> {
    let mut out = File::create(target)?;
    let mut limited = entry.take(cap.saturating_add(1));
    let written = io::copy(&mut limited, &mut out)?;
    if written > cap {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "entry grows past its limit once decompressed",
        ));
    }
    out.sync_all()?;
    Ok(written)
}
