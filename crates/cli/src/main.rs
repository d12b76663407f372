//! CLI entry point for cutready
//!
//! Headless front-end: submits the given URLs, waits for their metadata,
//! runs the queue once and logs progress as it drains the update channel.

use clap::Parser;
use cutready::{
    run_startup_checks, Config, EngineContext, FormatMode, JobStatus, JobUpdate, RunEnd, Session,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// cutready - download videos and make them ready for editing
#[derive(Parser, Debug)]
#[command(name = "cutready")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video or playlist URLs to process
    #[arg(required = true)]
    urls: Vec<String>,

    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Output mode: passthrough, h264_cfr or prores
    #[arg(short, long)]
    mode: Option<FormatMode>,

    /// Maximum resolution: 4K, 1080p, 720p or best
    #[arg(short, long)]
    resolution: Option<String>,

    /// Directory for finished files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Attempts per job before it is marked failed
    #[arg(long)]
    retries: Option<u32>,

    /// Skip startup checks (ffmpeg, yt-dlp). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<Config, String> {
    let mut config = Config::load_or_default(&args.config)
        .map_err(|e| format!("failed to load {}: {}", args.config.display(), e))?;

    if let Some(mode) = args.mode {
        config.download.mode = mode;
    }
    if let Some(resolution) = &args.resolution {
        config.download.resolution = resolution.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.download.output_dir = dir.clone();
    }
    if let Some(retries) = args.retries {
        config.queue.retry_attempts = retries;
    }
    Ok(config)
}

/// Logs per-job progress in 10% steps
#[derive(Default)]
struct ProgressLog {
    buckets: HashMap<String, (JobStatus, u32)>,
}

impl ProgressLog {
    fn record(&mut self, session: &Session, update: &JobUpdate) {
        if update.all_complete {
            match &update.error {
                Some(message) if update.aborted => tracing::error!("run aborted: {}", message),
                _ => tracing::info!("all jobs processed"),
            }
            return;
        }
        if let Some(total) = update.total_progress {
            tracing::info!("overall progress {:.0}%", total);
        }

        let Some(url) = update.url.as_deref() else {
            return;
        };
        let Some(job) = session.board().get(url) else {
            return;
        };

        if let Some(title) = &update.title {
            tracing::info!(url, "{}", title);
        }
        if let Some(status) = update.status {
            match status {
                JobStatus::Failed => tracing::error!(
                    url,
                    "failed: {}",
                    job.error.as_deref().unwrap_or("unknown error")
                ),
                other => tracing::info!(url, title = %job.title, "{}", other),
            }
        }
        if update.progress.is_some() && job.status.is_active() {
            let bucket = (job.progress / 10.0).floor() as u32;
            let entry = self.buckets.entry(url.to_string()).or_insert((job.status, 0));
            if entry.0 != job.status {
                *entry = (job.status, 0);
            }
            if bucket > entry.1 {
                entry.1 = bucket;
                tracing::info!(url, "{} {}%", job.status, bucket * 10);
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        tracing::warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        eprintln!("Startup check failed: {}", e);
        return ExitCode::FAILURE;
    }

    let mode = config.download.mode;
    let resolution = config.download.resolution.clone();
    let output_dir = config.download.output_dir.clone();
    let tick = Duration::from_millis(config.ui.poll_interval_ms.max(10));

    let ctx = Arc::new(EngineContext::probe(config));
    tracing::info!(encoder = %ctx.effective_capability(), %mode, resolution = %resolution, "cutready ready");

    let mut session = Session::new(ctx);
    for url in &args.urls {
        if let Err(e) = session.submit(url) {
            tracing::warn!("skipping {:?}: {}", url, e);
        }
    }

    let mut log = ProgressLog::default();
    let mut interval = tokio::time::interval(tick);
    let mut started = false;

    loop {
        interval.tick().await;
        for update in session.pump() {
            log.record(&session, &update);
        }

        if !started {
            if session.awaiting_metadata() > 0 {
                continue;
            }
            match session.start(mode, &resolution, output_dir.clone()) {
                Ok(count) => {
                    tracing::info!(count, output_dir = %output_dir.display(), "processing queue");
                    started = true;
                }
                Err(e) => {
                    tracing::error!("nothing to do: {}", e);
                    break;
                }
            }
        } else if !session.is_running() {
            break;
        }
    }

    let counts = session.board().counts();
    tracing::info!(
        finished = counts.finished,
        failed = counts.failed,
        pending = counts.pending,
        "done"
    );

    let aborted = matches!(session.last_run(), Some(RunEnd::Aborted(_)));
    if counts.failed > 0 || aborted || counts.finished == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
