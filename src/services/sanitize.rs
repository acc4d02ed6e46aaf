//! Filename sanitization and collision-safe destination paths.
//!
//! Every name that reaches the filesystem passes through [`sanitize_filename`],
//! so a joined path can never leave the directory it was joined onto.

use std::path::{Path, PathBuf};
use tracing::warn;

/// Name used when sanitization leaves nothing behind.
pub const DEFAULT_FILENAME: &str = "document.xml";

/// Highest numeric suffix tried by [`unique_destination`].
pub const MAX_COLLISION_ATTEMPTS: u32 = 999;

/// Reduce an arbitrary client-supplied name to `[A-Za-z0-9._-]+`.
///
/// Only the last path segment is kept (both `/` and `\` count as
/// separators), every other disallowed character becomes `_`, and leading or
/// trailing `.`, `_`, `-` are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let replaced: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| matches!(c, '.' | '_' | '-'));

    if trimmed.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Pick a path for `filename` inside `dir` that does not exist yet.
///
/// Tries `name.ext`, then `name_1.ext` … `name_999.ext`. When every candidate
/// is taken the original path is returned and the collision is logged.
/// Touches the filesystem; async callers run it on the blocking pool.
pub fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let path = dir.join(filename);
    if !path.exists() {
        return path;
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };

    for attempt in 1..=MAX_COLLISION_ATTEMPTS {
        let candidate = match ext {
            Some(ext) => dir.join(format!("{}_{}.{}", stem, attempt, ext)),
            None => dir.join(format!("{}_{}", stem, attempt)),
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    warn!(
        "no free name for {} in {} after {} attempts, reusing original",
        filename,
        dir.display(),
        MAX_COLLISION_ATTEMPTS
    );
    path
}
