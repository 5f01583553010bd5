//! Status file: writes the monitor's state as JSON on every transition.
//!
//! Uses atomic write pattern: write to temp file then rename.
use crate::archive::ArchiveReport;
use crate::retention::PurgeReport;
use crate::watermark::Watermark;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Monitor loop states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Starting,
    Checking,
    Archiving,
    Purging,
    Idle,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: MonitorState,
    pub process_name: String,
    pub recorder_pid: Option<u32>,
    pub cycles: u64,
    pub crashes_detected: u64,
    pub watermark: Watermark,
    pub last_crash_at: Option<DateTime<Utc>>,
    pub last_archive: Option<ArchiveReport>,
    pub last_purge: Option<PurgeReport>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a new StatusFile writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Read the raw status JSON, if any monitor has written one.
    pub fn read_raw(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    /// Path to the status file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    process_name: String,
    recorder_pid: Option<u32>,
    cycles: u64,
    crashes_detected: u64,
    watermark: Watermark,
    last_crash_at: Option<DateTime<Utc>>,
    last_archive: Option<ArchiveReport>,
    last_purge: Option<PurgeReport>,
    started_at: DateTime<Utc>,
}

impl StatusTracker {
    /// Create a new tracker.
    pub fn new(status_path: PathBuf, process_name: &str) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            process_name: process_name.to_string(),
            recorder_pid: None,
            cycles: 0,
            crashes_detected: 0,
            watermark: Watermark::ZERO,
            last_crash_at: None,
            last_archive: None,
            last_purge: None,
            started_at: Utc::now(),
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: MonitorState) {
        let data = StatusData {
            pid: self.pid,
            state,
            process_name: self.process_name.clone(),
            recorder_pid: self.recorder_pid,
            cycles: self.cycles,
            crashes_detected: self.crashes_detected,
            watermark: self.watermark,
            last_crash_at: self.last_crash_at,
            last_archive: self.last_archive,
            last_purge: self.last_purge,
            started_at: self.started_at,
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    pub fn set_recorder_pid(&mut self, pid: Option<u32>) {
        self.recorder_pid = pid;
    }

    /// Count a started cycle.
    pub fn begin_cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn set_watermark(&mut self, watermark: Watermark) {
        self.watermark = watermark;
    }

    /// Record a detected crash.
    pub fn record_crash(&mut self) {
        self.crashes_detected += 1;
        self.last_crash_at = Some(Utc::now());
    }

    pub fn set_last_archive(&mut self, report: ArchiveReport) {
        self.last_archive = Some(report);
    }

    pub fn set_last_purge(&mut self, report: PurgeReport) {
        self.last_purge = Some(report);
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(state: MonitorState) -> StatusData {
        StatusData {
            pid: 4242,
            state,
            process_name: "myprocess.exe".to_string(),
            recorder_pid: Some(77),
            cycles: 12,
            crashes_detected: 1,
            watermark: Watermark::from_secs(1712345678.5),
            last_crash_at: Some(Utc::now()),
            last_archive: Some(ArchiveReport { copied: 2, failed: 0 }),
            last_purge: None,
            started_at: Utc::now(),
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_status_file_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status");
        let sf = StatusFile::new(path.clone());

        sf.write(&sample(MonitorState::Archiving)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["pid"], 4242);
        assert_eq!(parsed["state"], "archiving");
        assert_eq!(parsed["process_name"], "myprocess.exe");
        assert_eq!(parsed["recorder_pid"], 77);
        assert_eq!(parsed["cycles"], 12);
        assert_eq!(parsed["watermark"], 1712345678.5);
        assert_eq!(parsed["last_archive"]["copied"], 2);
        assert!(parsed["last_purge"].is_null());

        let tmp_path = dir
            .path()
            .join(format!(".status.tmp.{}", std::process::id()));
        assert!(
            !tmp_path.exists(),
            "temp file should be cleaned up by rename"
        );
    }

    #[test]
    fn test_all_monitor_states_serialize() {
        let states = vec![
            (MonitorState::Starting, "starting"),
            (MonitorState::Checking, "checking"),
            (MonitorState::Archiving, "archiving"),
            (MonitorState::Purging, "purging"),
            (MonitorState::Idle, "idle"),
        ];

        for (state, expected_str) in states {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", expected_str));
        }
    }

    #[test]
    fn test_status_tracker_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status");
        let mut tracker = StatusTracker::new(path.clone(), "myprocess.exe");

        tracker.set_recorder_pid(Some(1234));
        tracker.update(MonitorState::Starting);
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["state"], "starting");
        assert_eq!(parsed["cycles"], 0);
        assert_eq!(parsed["recorder_pid"], 1234);
        assert!(parsed["last_crash_at"].is_null());

        tracker.begin_cycle();
        tracker.record_crash();
        tracker.set_watermark(Watermark::from_secs(99.0));
        tracker.set_last_archive(ArchiveReport { copied: 3, failed: 1 });
        tracker.set_last_purge(PurgeReport { deleted: 5, failed: 0 });
        tracker.update(MonitorState::Idle);

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["state"], "idle");
        assert_eq!(parsed["cycles"], 1);
        assert_eq!(parsed["crashes_detected"], 1);
        assert_eq!(parsed["watermark"], 99.0);
        assert_eq!(parsed["last_archive"]["failed"], 1);
        assert_eq!(parsed["last_purge"]["deleted"], 5);
        assert!(parsed["last_crash_at"].is_string());
    }

    #[test]
    fn test_read_raw_missing_is_none() {
        let dir = tempdir().unwrap();
        let sf = StatusFile::new(dir.path().join("status"));
        assert!(sf.read_raw().is_none());
    }

    #[test]
    fn test_status_file_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/status"));
        assert!(sf.write(&sample(MonitorState::Checking)).is_err());
    }

    #[test]
    fn test_status_error_display() {
        let err = StatusError::Write {
            path: PathBuf::from("/tmp/test"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no perms"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to write temp status file"));
        assert!(msg.contains("no perms"));
    }
}
