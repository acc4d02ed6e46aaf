//! Classification of the worker's diagnostics channel.

use crate::models::worker::Diagnostics;

const FATAL_MARKER: &str = "fatal";
const ERROR_MARKER: &str = "error";
const WARNING_MARKER: &str = "warning";

/// Phrases an interpreter prints when a module it needs is not installed.
const MISSING_DEPENDENCY_PHRASES: [&str; 3] =
    ["modulenotfounderror", "no module named", "importerror"];

/// Partition diagnostics text into fatal, error and warning lines.
///
/// Matching is a case-insensitive substring test, first bucket wins, order
/// is preserved. Lines with no marker are trace noise and are dropped.
pub fn classify(stderr: &str) -> Diagnostics {
    let mut diagnostics = Diagnostics::default();
    for line in stderr.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lowered = line.to_lowercase();
        if lowered.contains(FATAL_MARKER) {
            diagnostics.fatals.push(line.to_string());
        } else if lowered.contains(ERROR_MARKER) {
            diagnostics.errors.push(line.to_string());
        } else if lowered.contains(WARNING_MARKER) {
            diagnostics.warnings.push(line.to_string());
        }
    }
    diagnostics
}

/// True when the diagnostics show the worker could not import a dependency.
pub fn detect_missing_dependency(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    MISSING_DEPENDENCY_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_go_to_the_first_matching_bucket() {
        let stderr = "\
Processing: a.xml
[a.xml] WARNING: missing RFC
[b.xml] ERROR: malformed root element
FATAL: unexpected error: disk full
error and warning on one line

Done";
        let d = classify(stderr);
        assert_eq!(d.warnings, vec!["[a.xml] WARNING: missing RFC"]);
        assert_eq!(
            d.errors,
            vec![
                "[b.xml] ERROR: malformed root element",
                "error and warning on one line"
            ]
        );
        assert_eq!(d.fatals, vec!["FATAL: unexpected error: disk full"]);
    }

    #[test]
    fn markers_are_case_insensitive() {
        let d = classify("Warning: late\nfatal: boom\nError: bad");
        assert_eq!(d.warnings.len(), 1);
        assert_eq!(d.errors.len(), 1);
        assert_eq!(d.fatals.len(), 1);
    }

    #[test]
    fn noise_only_input_yields_empty_buckets() {
        assert!(classify("Processing 3 files...\n✓ done\n").is_empty());
        assert!(classify("").is_empty());
    }

    #[test]
    fn missing_dependency_phrases_are_detected() {
        assert!(detect_missing_dependency(
            "Traceback (most recent call last):\nModuleNotFoundError: No module named 'openpyxl'"
        ));
        assert!(detect_missing_dependency("ImportError: cannot import name 'Workbook'"));
        assert!(!detect_missing_dependency("ERROR: malformed root element"));
    }
}
