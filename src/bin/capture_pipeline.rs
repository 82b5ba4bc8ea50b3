//! capture_pipeline - pipeline process spawned by capture_supervisor
//!
//! This process:
//! 1. Parses the validated run config from its sole argument
//! 2. Creates `positive/stream_<i>` and `negative/stream_<i>` under the output dir
//! 3. Runs the media pipeline with the capture controller attached
//! 4. Stops on SIGINT/SIGTERM and logs capture stats

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use capture_sentinel::{pipeline::pipeline_for, run_pipeline, RunConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let arg = args
        .next()
        .ok_or_else(|| anyhow!("usage: capture_pipeline <run-config-json>"))?;
    if args.next().is_some() {
        return Err(anyhow!("capture_pipeline takes exactly one argument"));
    }
    let config = RunConfig::from_arg(&arg)?;

    let output_root = std::env::var("CAPTURE_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));

    let mut pipeline = pipeline_for(&config)?;
    let stop = pipeline.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting termination handler: {}", e))?;

    log::info!(
        "capture_pipeline {} (pid {}) writing to {}",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        output_root.display()
    );
    run_pipeline(&config, &output_root, &mut pipeline)?;
    log::info!("capture_pipeline exiting");
    Ok(())
}
