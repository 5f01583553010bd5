//! Copy finalized trace files out of the recorder's working directory into
//! the durable output location.
//!
//! Copies are flat: only the file name is kept, subdirectories are not
//! recreated. An existing file with the same name is overwritten.
//! Failures on individual files are logged but do not stop processing.

use filetime::FileTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Counts from one archive pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub copied: u32,
    pub failed: u32,
}

/// Errors that prevent an archive pass from starting.
#[derive(Debug)]
pub enum ArchiveError {
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::OutputDir { path, source } => {
                write!(
                    f,
                    "failed to create archive directory {}: {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::OutputDir { source, .. } => Some(source),
        }
    }
}

/// Whether `name` ends in one of the finalized-trace suffixes.
pub fn is_finalized(name: &str, suffixes: &[String]) -> bool {
    suffixes.iter().any(|s| name.ends_with(s.as_str()))
}

/// Copy every finalized trace under `working_dir` into `output_dir`.
pub fn archive(
    working_dir: &Path,
    output_dir: &Path,
    suffixes: &[String],
) -> Result<ArchiveReport, ArchiveError> {
    std::fs::create_dir_all(output_dir).map_err(|e| ArchiveError::OutputDir {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let mut report = ArchiveReport::default();

    for entry in WalkDir::new(working_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read trace directory entry, skipping");
                continue;
            }
        };
        if !entry.path().is_file() {
            continue;
        }
        let file_name = entry.file_name();
        if !is_finalized(&file_name.to_string_lossy(), suffixes) {
            continue;
        }

        let dest = output_dir.join(file_name);
        match copy_preserving_times(entry.path(), &dest) {
            Ok(bytes) => {
                report.copied += 1;
                tracing::info!(
                    from = %entry.path().display(),
                    to = %dest.display(),
                    bytes,
                    "archived trace file"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    error = %e,
                    file = %entry.path().display(),
                    "failed to archive trace file"
                );
            }
        }
    }

    Ok(report)
}

/// Copy contents and permissions, then carry over access and modification times.
fn copy_preserving_times(src: &Path, dest: &Path) -> std::io::Result<u64> {
    let bytes = std::fs::copy(src, dest)?;
    let meta = std::fs::metadata(src)?;
    filetime::set_file_times(
        dest,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    Ok(bytes)
}
