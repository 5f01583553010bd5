mod archive;
mod config;
mod data_dir;
mod db;
mod dumps;
mod monitor;
mod observer;
mod recorder;
mod retention;
mod status;
mod watermark;

use clap::Parser;
use config::{Config, Overrides};
use data_dir::DataDir;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// A Rust daemon that keeps a time-travel trace of one process running:
/// configure full crash dumps, start the recorder, then archive the trace
/// whenever a new crash dump appears and discard it otherwise.
#[derive(Parser, Debug)]
#[command(name = "crashtrace", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "crashtrace.toml")]
    config: PathBuf,

    /// Monitored process name (overrides config)
    #[arg(short, long)]
    process: Option<String>,

    /// Trace working directory (overrides config)
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Durable output directory for crash traces (overrides config)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Crash dump directory to watch (overrides config)
    #[arg(long)]
    crash_dumps_dir: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Run a single check/archive/purge cycle and exit
    #[arg(long)]
    once: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the running monitor's status and exit
    #[arg(long)]
    status: bool,

    /// Print the most recent crash events and exit
    #[arg(long, value_name = "N", num_args = 0..=1, default_missing_value = "20")]
    history: Option<i64>,

    /// Extra logging (per-file archive/purge decisions, scan details)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    tracing::debug!(?cli, "parsed CLI arguments");

    let overrides = Overrides {
        process_name: cli.process.clone(),
        working_dir: cli.working_dir.clone(),
        output_dir: cli.output_dir.clone(),
        crash_dumps_dir: cli.crash_dumps_dir.clone(),
        poll_interval_secs: cli.poll_interval,
    };
    let config = match Config::load(&cli.config, overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    let data_dir = DataDir::new(&config.paths.state_dir);

    if cli.dry_run {
        print_resolved(&config);
        return;
    }

    if cli.status {
        let status = status::StatusFile::new(data_dir.status());
        match status.read_raw() {
            Some(json) => println!("{json}"),
            None => println!("No status at {}", status.path().display()),
        }
        return;
    }

    if let Some(limit) = cli.history {
        if let Err(e) = print_history(&data_dir, limit) {
            tracing::error!(error = %e, "failed to read crash history");
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = run(&config, &data_dir, cli.once).await {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

/// Startup sequence, then the monitor loop. Only startup errors are returned.
async fn run(
    config: &Config,
    data_dir: &DataDir,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if data_dir.init()? {
        tracing::info!(path = %data_dir.root().display(), "created state directory");
    }
    let _lock = data_dir.acquire_lock()?;

    if config.dumps.configure {
        dumps::configure(config.dumps.dump_type)?;
    } else {
        tracing::info!("crash dump configuration disabled, relying on existing OS settings");
    }

    let recorder = recorder::start(
        &config.recorder,
        &config.monitor.process_name,
        &config.paths.working_dir,
    )?;

    let mut monitor = monitor::Monitor::new(config, data_dir);
    monitor.attach_recorder(&recorder);
    // The recorder is intentionally not supervised past this point.
    drop(recorder);

    if once {
        let outcome = monitor.run_once().await;
        tracing::info!(
            crash_detected = outcome.check.found,
            archived = outcome.archive.map_or(0, |r| r.copied),
            purged = outcome.purge.deleted,
            "single cycle complete"
        );
    } else {
        monitor.run().await;
    }
    Ok(())
}

fn print_resolved(config: &Config) {
    println!("crashtrace v{}", env!("CARGO_PKG_VERSION"));
    println!("process:           {}", config.monitor.process_name);
    println!("poll interval:     {}s", config.monitor.poll_interval_secs);
    println!("flush grace:       {}s", config.monitor.flush_grace_secs);
    println!("working dir:       {}", config.paths.working_dir.display());
    println!("crash dumps dir:   {}", config.paths.crash_dumps_dir.display());
    println!("output dir:        {}", config.paths.output_dir.display());
    println!("watermark file:    {}", config.paths.watermark_file.display());
    println!("state dir:         {}", config.paths.state_dir.display());
    println!(
        "recorder:          {} {}",
        config.recorder.command,
        config.recorder.args.join(" ")
    );
    println!(
        "finalized traces:  {}",
        config.archive.finalized_suffixes.join(", ")
    );
    println!(
        "dump config:       {} ({:?})",
        if config.dumps.configure { "on" } else { "off" },
        config.dumps.dump_type
    );
    println!("Dry run mode — config validated, not running.");
}

fn print_history(data_dir: &DataDir, limit: i64) -> Result<(), String> {
    if limit <= 0 {
        return Err("--history must be greater than 0".to_string());
    }
    let db_path = data_dir.db();
    if !db_path.exists() {
        println!("No crash events recorded.");
        return Ok(());
    }

    let conn = db::open_or_create(&db_path).map_err(|e| format!("Failed to open database: {e}"))?;
    let rows = db::recent_crash_events(&conn, limit)
        .map_err(|e| format!("Failed to list crash events: {e}"))?;

    if rows.is_empty() {
        println!("No crash events recorded.");
        return Ok(());
    }

    println!(
        "{:<6} {:<22} {:<20} {:<18} {:>6} {:>6}  OUTPUT",
        "ID", "DETECTED", "PROCESS", "WATERMARK", "COPIED", "FAILED"
    );
    println!("{}", "-".repeat(100));
    for row in rows {
        println!(
            "{:<6} {:<22} {:<20} {:<18} {:>6} {:>6}  {}",
            row.id,
            row.detected_at,
            row.process_name,
            row.watermark,
            row.copied,
            row.failed,
            row.output_dir
        );
        for artifact in row.artifacts.lines() {
            println!("       dump: {artifact}");
        }
    }
    Ok(())
}
