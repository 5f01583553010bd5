//! Trace retention: empty the recorder's working directory every cycle.

use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

/// Counts from one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: u32,
    pub failed: u32,
}

/// Delete every file under `working_dir`, regardless of suffix.
///
/// Directories are left in place. A file the recorder still holds open
/// fails to delete on some platforms; such failures are logged and the
/// remaining files are still processed.
pub fn purge(working_dir: &Path) -> PurgeReport {
    let mut report = PurgeReport::default();

    if !working_dir.exists() {
        tracing::debug!(dir = %working_dir.display(), "working directory does not exist, nothing to purge");
        return report;
    }

    for entry in WalkDir::new(working_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read trace directory entry, skipping");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.deleted += 1;
                tracing::debug!(file = %entry.path().display(), "deleted trace file");
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    error = %e,
                    file = %entry.path().display(),
                    "could not delete trace file"
                );
            }
        }
    }

    report
}
