use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Manages the `.crashtrace/` state directory layout.
///
/// The monitor's own bookkeeping (status file, crash history, singleton lock)
/// lives under a single directory. The watermark file is configured
/// separately since it may need to survive a state directory reset.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `.crashtrace/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the crash history database.
    pub fn db(&self) -> PathBuf {
        self.root.join("crashtrace.db")
    }

    /// Path to the monitor status file.
    pub fn status(&self) -> PathBuf {
        self.root.join("status")
    }

    /// Path to the singleton lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Create the root directory.
    /// Returns Ok(true) if it was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        Ok(created)
    }

    /// Take the singleton lock so no second monitor shares the working
    /// directory and watermark file.
    ///
    /// The lock is released when the returned guard is dropped or the
    /// process exits.
    pub fn acquire_lock(&self) -> Result<InstanceLock, LockError> {
        let path = self.lock();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LockError::Open {
                path: path.clone(),
                source: e,
            })?;

        file.try_lock_exclusive()
            .map_err(|e| LockError::Held { path, source: e })?;

        Ok(InstanceLock { _file: file })
    }
}

/// Held for the lifetime of the monitor.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
}

/// Errors from taking the singleton lock.
#[derive(Debug)]
pub enum LockError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Held {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Open { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            LockError::Held { path, source } => {
                write!(
                    f,
                    "another monitor already holds {}: {source}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Open { source, .. } => Some(source),
            LockError::Held { source, .. } => Some(source),
        }
    }
}
