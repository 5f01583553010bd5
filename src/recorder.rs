//! Recorder launch: start the external trace recorder attached to the
//! monitored process name and leave it running.
use crate::config::RecorderConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// A recorder that was launched and then let go.
///
/// The monitor does not wait on, restart, or reap the recorder; it is
/// expected to live as long as the monitor. Dropping this value leaves the
/// process running.
#[derive(Debug)]
pub struct DetachedRecorder {
    /// OS process id at launch (None if the child already exited).
    pub pid: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
}

/// Errors that can occur while launching the recorder.
#[derive(Debug)]
pub enum RecorderError {
    /// Failed to create the working directory the recorder writes into.
    WorkingDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the recorder process.
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::WorkingDir { path, source } => {
                write!(
                    f,
                    "failed to create trace working directory {}: {}",
                    path.display(),
                    source
                )
            }
            RecorderError::Spawn { command, source } => {
                write!(f, "failed to spawn recorder {}: {}", command, source)
            }
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::WorkingDir { source, .. } => Some(source),
            RecorderError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Build the recorder arguments, replacing `{out}` and `{process}` placeholders.
fn build_args(recorder: &RecorderConfig, working_dir: &Path, process_name: &str) -> Vec<String> {
    let out = working_dir.to_string_lossy();
    recorder
        .args
        .iter()
        .map(|arg| arg.replace("{out}", &out).replace("{process}", process_name))
        .collect()
}

/// Ensure `working_dir` exists, then launch the recorder without waiting for it.
///
/// On Unix the recorder gets its own process group so terminal signals aimed
/// at the monitor do not reach it.
pub fn start(
    recorder: &RecorderConfig,
    process_name: &str,
    working_dir: &Path,
) -> Result<DetachedRecorder, RecorderError> {
    std::fs::create_dir_all(working_dir).map_err(|e| RecorderError::WorkingDir {
        path: working_dir.to_path_buf(),
        source: e,
    })?;

    let args = build_args(recorder, working_dir, process_name);
    tracing::info!(
        command = %recorder.command,
        args = ?args,
        process = process_name,
        "starting trace recorder"
    );

    let mut command = Command::new(&recorder.command);
    command
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(false);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| RecorderError::Spawn {
        command: recorder.command.clone(),
        source: e,
    })?;

    let pid = child.id();
    tracing::info!(pid = ?pid, "trace recorder started (detached)");

    Ok(DetachedRecorder {
        pid,
        command: recorder.command.clone(),
        args,
    })
}
