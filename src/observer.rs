//! Crash detection: scan the crash-report location for artifacts of the
//! monitored process that are newer than the watermark.

use crate::watermark::Watermark;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome of one scan of the crash-report location.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashCheck {
    /// At least one artifact is strictly newer than the input watermark.
    pub found: bool,
    /// Max of the input watermark and every qualifying artifact's mtime.
    pub watermark: Watermark,
    /// Qualifying artifacts, sorted by path.
    pub artifacts: Vec<PathBuf>,
}

/// Scan `crash_dir` recursively for files whose name contains `process_name`
/// and whose modification time is strictly greater than `watermark`.
///
/// Has no side effects; persisting the returned watermark is the caller's job.
/// A missing directory is an empty scan. Entries that cannot be read are skipped.
pub fn check(process_name: &str, crash_dir: &Path, watermark: Watermark) -> CrashCheck {
    let mut newest = watermark;
    let mut artifacts = Vec::new();

    if !crash_dir.exists() {
        tracing::debug!(dir = %crash_dir.display(), "crash report directory does not exist");
        return CrashCheck {
            found: false,
            watermark,
            artifacts,
        };
    }

    for entry in WalkDir::new(crash_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read crash report entry, skipping");
                continue;
            }
        };
        // Symlinks to files count as files; their target's mtime is used.
        if !entry.path().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().contains(process_name) {
            continue;
        }

        let modified = match std::fs::metadata(entry.path()).and_then(|m| m.modified()) {
            Ok(t) => Watermark::from_system_time(t),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %entry.path().display(),
                    "failed to read crash artifact mtime, skipping"
                );
                continue;
            }
        };

        if modified > watermark {
            tracing::debug!(
                path = %entry.path().display(),
                mtime = %modified,
                "new crash artifact"
            );
            newest = newest.max(modified);
            artifacts.push(entry.into_path());
        }
    }

    artifacts.sort();
    CrashCheck {
        found: !artifacts.is_empty(),
        watermark: newest,
        artifacts,
    }
}
