//! toptrace - headless runner for the report pipeline.
//!
//! Supports two modes:
//! - Live mode (default): run a report command and follow its output
//! - Replay mode: split and ingest a recorded report file once
//!
//! Usage:
//!   toptrace                                  # live, default device command
//!   toptrace --command "top -b -d 1"          # live, custom command
//!   toptrace --file top_20240101.120000.log   # replay a recorded file
//!   toptrace --file top.log --json            # replay, print the store as JSON

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use toptrace::MonitorConfig;
use toptrace::pipeline::Pipeline;
use toptrace::provider::{LiveProvider, ReplayProvider, SnapshotProvider};
use toptrace::storage::{FileArchive, SharedStore, StoreView, TOTAL_CPU_KEY, TimeSeriesStore};
use toptrace::util::CancellationToken;

/// Default live report command (busybox top on an attached device).
const DEFAULT_COMMAND: &str = "adb -host shell ctop -b -d 1";

/// Series trailing "Total CPU" by more than this many seconds are flagged.
const MAX_LAG_SECONDS: i64 = 10;

/// Follows a `top -b` style report and keeps per-process CPU history.
#[derive(Parser)]
#[command(name = "toptrace", about = "Process activity time series from top reports", version)]
struct Args {
    /// Replay a recorded report file instead of running a command.
    #[arg(short, long, value_name = "PATH", conflicts_with = "command")]
    file: Option<PathBuf>,

    /// Report command for live mode, run through `sh -c`.
    #[arg(short, long, default_value = DEFAULT_COMMAND)]
    command: String,

    /// JSON configuration file. Flags below override its values.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Points kept per series.
    #[arg(long)]
    max_data_points: Option<usize>,

    /// Process observations accepted per snapshot.
    #[arg(long)]
    max_process_num: Option<usize>,

    /// Process rows at or below this %CPU are ignored.
    #[arg(long)]
    min_cpu: Option<f64>,

    /// Calibration added to the "Total CPU" series.
    #[arg(long, allow_hyphen_values = true)]
    cpu_offset: Option<f64>,

    /// Only keep these processes (repeatable). Replaces the configured list.
    #[arg(long = "select", value_name = "NAME")]
    selected: Vec<String>,

    /// Never keep these processes (repeatable). Replaces the configured list.
    #[arg(long = "exclude", value_name = "NAME")]
    excluded: Vec<String>,

    /// Archive raw snapshots to a new log file in this directory.
    #[arg(long, value_name = "DIR")]
    archive_dir: Option<PathBuf>,

    /// Seconds between store summaries.
    #[arg(short, long, default_value = "5")]
    interval: u64,

    /// Print summaries as JSON.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("toptrace={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration file (if any) and applies command-line overrides.
fn load_config(args: &Args) -> Result<MonitorConfig, String> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_json_file(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?,
        None => MonitorConfig::default(),
    };

    if let Some(v) = args.max_data_points {
        config.max_data_points = v;
    }
    if let Some(v) = args.max_process_num {
        config.max_process_num = v;
    }
    if let Some(v) = args.min_cpu {
        config.min_cpu = v;
    }
    if let Some(v) = args.cpu_offset {
        config.cpu_offset = v;
    }
    if !args.selected.is_empty() {
        config.selected_processes = args.selected.clone();
    }
    if !args.excluded.is_empty() {
        config.excluded_processes = args.excluded.clone();
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Prints one summary of the store to stdout.
fn print_summary(view: &StoreView, json: bool) {
    if json {
        match serde_json::to_string(view) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize store: {}", e),
        }
        return;
    }

    let clock = view
        .total_cpu()
        .and_then(|s| s.last())
        .map(|p| p.timestamp.as_str())
        .unwrap_or("--:--:--");
    println!("[{}] {} series", clock, view.len());

    let lagging = view.lagging(MAX_LAG_SECONDS);
    for series in view.iter() {
        let window = if series.key == TOTAL_CPU_KEY { 5 } else { 10 };
        let last = series.last().map(|p| p.value).unwrap_or_default();
        let average = series.recent_average(window).unwrap_or_default();
        print!(
            "  {:<24} {:>3} pts  last {:>6.2}  avg({}) {:>6.2}",
            series.key,
            series.len(),
            last,
            window,
            average
        );
        match lagging.iter().find(|(key, _)| *key == series.key) {
            Some((_, lag)) => println!("  (stale {}s)", lag),
            None => println!(),
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let provider: Box<dyn SnapshotProvider + Send> = match &args.file {
        Some(path) => match ReplayProvider::from_path(path, config.max_pending_lines) {
            Ok(provider) => Box::new(provider),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            info!("Running report command: {}", args.command);
            Box::new(LiveProvider::spawn(&args.command, &config, cancel.clone()))
        }
    };

    // Cancelling also kills the report command, which unblocks the consumer.
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_cancel.cancel();
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let store = SharedStore::new(TimeSeriesStore::new(
        config.max_data_points,
        config.selection_filter(),
    ));
    let mut pipeline = Pipeline::new(provider, &config, store.clone(), cancel.clone());
    if let Some(dir) = &args.archive_dir {
        match FileArchive::create(dir, config.archive_max_lines) {
            Ok(archive) => pipeline = pipeline.with_archive(Box::new(archive)),
            Err(e) => warn!("Archive disabled: {}: {}", dir.display(), e),
        }
    }

    let consumer = match thread::Builder::new()
        .name("pipeline".to_string())
        .spawn(move || pipeline.run())
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: failed to start pipeline thread: {}", e);
            std::process::exit(1);
        }
    };

    // Summaries on a fixed cadence, with periodic checks for the consumer ending.
    let interval = Duration::from_secs(args.interval.max(1));
    let sleep_interval = Duration::from_millis(100);
    while !consumer.is_finished() && !cancel.is_cancelled() {
        let mut remaining = interval;
        while remaining > Duration::ZERO && !consumer.is_finished() && !cancel.is_cancelled() {
            let sleep_time = remaining.min(sleep_interval);
            thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
        if remaining == Duration::ZERO {
            print_summary(&store.snapshot(), args.json);
        }
    }

    let result = consumer.join();
    print_summary(&store.snapshot(), args.json);

    match result {
        Ok(Ok(stats)) => {
            info!(
                "Done: {} snapshots stored, {} dropped, {} malformed lines",
                stats.snapshots_accepted, stats.snapshots_dropped, stats.malformed_lines
            );
        }
        Ok(Err(e)) => {
            error!("Pipeline failed: {}", e);
            std::process::exit(2);
        }
        Err(_) => {
            error!("Pipeline thread panicked");
            std::process::exit(2);
        }
    }
}
