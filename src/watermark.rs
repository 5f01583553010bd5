//! Persisted crash watermark: the modification time of the newest crash
//! artifact already handled.
//!
//! Stored as a single decimal number of seconds since the Unix epoch in a
//! plain text file. Absent or unparsable content reads back as zero.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch separating already-seen from new crash artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Watermark(f64);

impl Watermark {
    /// The "beginning of time" watermark used on first run.
    pub const ZERO: Watermark = Watermark(0.0);

    /// Build a watermark from raw seconds. Non-finite or negative input clamps to zero.
    pub fn from_secs(secs: f64) -> Self {
        if secs.is_finite() && secs > 0.0 {
            Watermark(secs)
        } else {
            Watermark::ZERO
        }
    }

    /// Convert a file modification time. Times before the epoch map to zero.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Watermark(d.as_secs_f64()),
            Err(_) => Watermark::ZERO,
        }
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// The later of two watermarks.
    pub fn max(self, other: Watermark) -> Watermark {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }

    /// Parse persisted text. Returns `None` for anything that is not a finite, non-negative number.
    fn parse(text: &str) -> Option<Watermark> {
        let secs: f64 = text.trim().parse().ok()?;
        if secs.is_finite() && secs >= 0.0 {
            Some(Watermark::from_secs(secs))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // f64 Display is the shortest string that parses back to the same value.
        write!(f, "{}", self.0)
    }
}

/// Errors from persisting the watermark.
#[derive(Debug)]
pub enum WatermarkError {
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatermarkError::CreateDir { path, source } => {
                write!(
                    f,
                    "failed to create watermark directory {}: {source}",
                    path.display()
                )
            }
            WatermarkError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp watermark file in {}: {source}",
                    path.display()
                )
            }
            WatermarkError::Persist { path, source } => {
                write!(f, "failed to replace {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for WatermarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatermarkError::CreateDir { source, .. } => Some(source),
            WatermarkError::Write { source, .. } => Some(source),
            WatermarkError::Persist { source, .. } => Some(source),
        }
    }
}

/// File-backed watermark persistence.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted watermark. Never fails: absence and corruption both yield zero.
    pub fn read(&self) -> Watermark {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no watermark file yet");
                return Watermark::ZERO;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "failed to read watermark file, treating as zero"
                );
                return Watermark::ZERO;
            }
        };

        match Watermark::parse(&contents) {
            Some(w) => w,
            None => {
                tracing::warn!(
                    path = %self.path.display(),
                    contents = %contents.trim(),
                    "corrupt watermark file, treating as zero"
                );
                Watermark::ZERO
            }
        }
    }

    /// Atomically replace the persisted watermark.
    ///
    /// Writes to a temporary file in the same directory, then renames it over
    /// the target so a crash mid-write never leaves a truncated value behind.
    pub fn write(&self, watermark: Watermark) -> Result<(), WatermarkError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| WatermarkError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| WatermarkError::Write {
            path: dir.to_path_buf(),
            source: e,
        })?;
        tmp.write_all(watermark.to_string().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| WatermarkError::Write {
                path: dir.to_path_buf(),
                source: e,
            })?;

        tmp.persist(&self.path)
            .map_err(|e| WatermarkError::Persist {
                path: self.path.clone(),
                source: e.error,
            })?;

        tracing::debug!(path = %self.path.display(), %watermark, "watermark persisted");
        Ok(())
    }
}
