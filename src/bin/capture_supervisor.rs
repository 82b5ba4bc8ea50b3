//! capture_supervisor - file-signal driven supervisor for the capture pipeline
//!
//! This daemon:
//! 1. Optionally checks that configured sources answer, and raises the start signal if so
//! 2. Polls the signal directory for `trigger.txt` (start/restart) and `quit.txt` (stop)
//! 3. Reloads and validates `config.json` on every start signal
//! 4. Keeps at most one `capture_pipeline` process alive
//! 5. Terminates the pipeline on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capture_sentinel::{
    all_reachable, probe_sources, CommandLauncher, ConfigLoader, Signal, SignalWatcher,
    Supervisor, SupervisorSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Supervise the detection-triggered capture pipeline")]
struct Args {
    /// Directory watched for trigger.txt and quit.txt.
    #[arg(long, env = "CAPTURE_SIGNAL_DIR", default_value = "check")]
    signal_dir: PathBuf,

    /// Run configuration, reloaded on every start signal.
    #[arg(long, env = "CAPTURE_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Pipeline executable. Defaults to capture_pipeline next to this binary.
    #[arg(long, env = "CAPTURE_PIPELINE_BIN")]
    pipeline_bin: Option<PathBuf>,

    /// Root for positive/ and negative/ image directories.
    #[arg(long, env = "CAPTURE_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Sleep between polls, in milliseconds.
    #[arg(long, env = "CAPTURE_POLL_MS", default_value_t = 1000)]
    poll_ms: u64,

    /// Delay after a signal file is found, in milliseconds.
    #[arg(long, env = "CAPTURE_SETTLE_MS", default_value_t = 3000)]
    settle_ms: u64,

    /// SIGTERM-to-SIGKILL grace period, in milliseconds.
    #[arg(long, env = "CAPTURE_GRACE_MS", default_value_t = 3000)]
    grace_ms: u64,

    /// Allow configs without tiler_width/tiler_height.
    #[arg(long, env = "CAPTURE_HEADLESS")]
    headless: bool,

    /// Skip the startup source check.
    #[arg(long)]
    no_probe: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut loader = ConfigLoader::new(&args.config);
    if args.headless {
        loader = loader.headless();
    }

    if !args.no_probe {
        startup_probe(&loader, &SignalWatcher::new(&args.signal_dir));
    }

    let pipeline_bin = match args.pipeline_bin {
        Some(path) => path,
        None => default_pipeline_bin()?,
    };
    let launcher = CommandLauncher::new(&pipeline_bin).with_env(
        "CAPTURE_OUTPUT_DIR",
        args.output_dir.to_string_lossy().into_owned(),
    );

    let settings = SupervisorSettings {
        signal_dir: args.signal_dir,
        config: loader,
        poll_interval: Duration::from_millis(args.poll_ms),
        signal_settle: Duration::from_millis(args.settle_ms),
        respawn_delay: Duration::from_millis(args.settle_ms),
        terminate_grace: Duration::from_millis(args.grace_ms),
    };
    let mut supervisor = Supervisor::new(settings, launcher);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "capture_supervisor {} using pipeline {}",
        env!("CARGO_PKG_VERSION"),
        pipeline_bin.display()
    );
    supervisor.run(&shutdown);
    Ok(())
}

/// Check sources once at startup and raise the start signal if all answer.
fn startup_probe(loader: &ConfigLoader, watcher: &SignalWatcher) {
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("startup check skipped: {:#}", e);
            return;
        }
    };
    let outcomes = probe_sources(&config);
    for outcome in &outcomes {
        log::info!(
            "source {}: reachable={} ({})",
            outcome.name,
            outcome.reachable,
            outcome.detail
        );
    }
    if all_reachable(&outcomes) {
        match watcher.raise(Signal::Start) {
            Ok(()) => log::info!("all sources reachable; start signal raised"),
            Err(e) => log::error!("failed to raise start signal: {:#}", e),
        }
    }
}

fn default_pipeline_bin() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| anyhow!("cannot locate current executable: {}", e))?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow!("executable {} has no parent directory", exe.display()))?;
    Ok(dir.join(format!("capture_pipeline{}", std::env::consts::EXE_SUFFIX)))
}
