//! The monitor loop: check for a new crash, archive the trace if there was
//! one, purge the working directory, sleep, repeat.
//!
//! Every step runs to completion before the next starts. Nothing that goes
//! wrong inside a cycle stops the loop; failures are logged and the next
//! poll acts as the retry.

use crate::archive::{self, ArchiveReport};
use crate::config::Config;
use crate::data_dir::DataDir;
use crate::db;
use crate::observer::{self, CrashCheck};
use crate::recorder::DetachedRecorder;
use crate::retention::{self, PurgeReport};
use crate::status::{MonitorState, StatusTracker};
use crate::watermark::WatermarkStore;
use rusqlite::Connection;
use std::time::Duration;

/// What a single cycle observed and did.
#[derive(Debug)]
pub struct CycleOutcome {
    pub check: CrashCheck,
    /// Present only when a crash was detected and the archive pass ran.
    pub archive: Option<ArchiveReport>,
    pub purge: PurgeReport,
}

pub struct Monitor<'a> {
    config: &'a Config,
    store: WatermarkStore,
    status: StatusTracker,
    history: Option<Connection>,
    flush_grace: Duration,
    poll_interval: Duration,
}

impl<'a> Monitor<'a> {
    /// Build a monitor over `config`, keeping bookkeeping under `data_dir`.
    ///
    /// The history database is optional: if it cannot be opened, crashes are
    /// still handled, just not recorded.
    pub fn new(config: &'a Config, data_dir: &DataDir) -> Self {
        let history = match db::open_or_create(&data_dir.db()) {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %data_dir.db().display(),
                    "failed to open crash history database, crashes will not be recorded"
                );
                None
            }
        };

        Self {
            config,
            store: WatermarkStore::new(&config.paths.watermark_file),
            status: StatusTracker::new(data_dir.status(), &config.monitor.process_name),
            history,
            flush_grace: config.monitor.flush_grace(),
            poll_interval: config.monitor.poll_interval(),
        }
    }

    /// Override the flush grace and poll interval.
    #[cfg(test)]
    fn with_timing(mut self, flush_grace: Duration, poll_interval: Duration) -> Self {
        self.flush_grace = flush_grace;
        self.poll_interval = poll_interval;
        self
    }

    /// Note the recorder in the status file. The monitor does not supervise it.
    pub fn attach_recorder(&mut self, recorder: &DetachedRecorder) {
        tracing::debug!(
            pid = ?recorder.pid,
            command = %recorder.command,
            args = ?recorder.args,
            "recorder attached to status"
        );
        self.status.set_recorder_pid(recorder.pid);
        self.status.update(MonitorState::Starting);
    }

    /// Run one Checking → (Archiving) → Purging pass.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let config = self.config;
        let process_name = &config.monitor.process_name;
        let paths = &config.paths;

        self.status.begin_cycle();
        self.status.update(MonitorState::Checking);

        let watermark = self.store.read();
        self.status.set_watermark(watermark);
        let check = observer::check(process_name, &paths.crash_dumps_dir, watermark);

        let archive = if check.found {
            if let Err(e) = self.store.write(check.watermark) {
                tracing::warn!(error = %e, "failed to persist watermark");
            }
            self.status.set_watermark(check.watermark);
            self.status.record_crash();

            tracing::info!(
                process = %process_name,
                artifacts = check.artifacts.len(),
                watermark = %check.watermark,
                "crash detected, archiving trace"
            );
            for path in &check.artifacts {
                tracing::info!(path = %path.display(), "crash artifact");
            }

            self.status.update(MonitorState::Archiving);
            // The recorder has no completion signal; give it time to flush.
            tokio::time::sleep(self.flush_grace).await;

            let report = match archive::archive(
                &paths.working_dir,
                &paths.output_dir,
                &config.archive.finalized_suffixes,
            ) {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(error = %e, "archive pass failed");
                    ArchiveReport::default()
                }
            };
            tracing::info!(
                copied = report.copied,
                failed = report.failed,
                output = %paths.output_dir.display(),
                "trace archive pass complete"
            );
            self.status.set_last_archive(report);
            self.record_history(&check, report);
            Some(report)
        } else {
            tracing::debug!(process = %process_name, "no crash detected");
            None
        };

        self.status.update(MonitorState::Purging);
        let purge = retention::purge(&paths.working_dir);
        if purge.deleted > 0 || purge.failed > 0 {
            tracing::info!(
                deleted = purge.deleted,
                failed = purge.failed,
                "purged trace working directory"
            );
        }
        self.status.set_last_purge(purge);

        CycleOutcome {
            check,
            archive,
            purge,
        }
    }

    /// Run cycles forever, sleeping the poll interval between them.
    pub async fn run(&mut self) {
        tracing::info!(
            process = %self.config.monitor.process_name,
            poll_interval_secs = self.poll_interval.as_secs(),
            watermark_file = %self.store.path().display(),
            "monitor loop started"
        );
        loop {
            self.run_cycle().await;
            self.status.update(MonitorState::Idle);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run exactly one cycle and leave the status file in `Idle`.
    pub async fn run_once(&mut self) -> CycleOutcome {
        let outcome = self.run_cycle().await;
        self.status.update(MonitorState::Idle);
        outcome
    }

    fn record_history(&self, check: &CrashCheck, report: ArchiveReport) {
        let Some(conn) = &self.history else {
            return;
        };

        let artifacts = check
            .artifacts
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let output_dir = self.config.paths.output_dir.display().to_string();
        let event = db::NewCrashEvent {
            process_name: &self.config.monitor.process_name,
            watermark: check.watermark.as_secs(),
            artifacts,
            output_dir: &output_dir,
            copied: report.copied,
            failed: report.failed,
        };

        if let Err(e) = db::insert_crash_event(conn, &event) {
            tracing::warn!(error = %e, "failed to record crash event");
        }
    }
}
