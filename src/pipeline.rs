//! Media pipeline boundary.
//!
//! The decode/infer/track pipeline is an external collaborator. It delivers
//! one `FrameBatch` per processed batch to a probe callback on its own
//! processing thread, one batch at a time, in frame order per stream.
//!
//! Only the synthetic pipeline (`stub://` sources) is built in. It produces
//! RGBA frames with deterministic object churn so the capture path can run
//! end to end without a vendor stack.

use anyhow::{bail, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CaptureController, CaptureEngine, CaptureStats};
use crate::config::RunConfig;
use crate::frame::{BatchSurface, FrameBatch, FrameEvent, PixelFormat, ProbeReturn, RawSurface};
use crate::persist::ImageStore;
use crate::tracker::ObjectId;

const STUB_SCHEME: &str = "stub://";
const DEFAULT_STUB_FPS: u32 = 10;
/// Frames per synthetic scene: empty, one object, then two objects.
const SCENE_FRAMES: u64 = 100;

/// Probe callback type handed to a pipeline.
pub type BatchProbe<'a> = dyn FnMut(&FrameBatch<BatchSurface>) -> ProbeReturn + 'a;

/// A media pipeline that delivers processed batches to a probe.
pub trait MediaPipeline {
    fn name(&self) -> &'static str;

    /// Run until end of stream or stop. Blocks the calling thread.
    fn run(&mut self, probe: &mut BatchProbe<'_>) -> Result<()>;
}

// ----------------------------------------------------------------------------
// Synthetic pipeline
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub number_sources: usize,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Stop after this many batches. `None` runs until stopped.
    pub max_batches: Option<u64>,
}

impl SyntheticConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            number_sources: config.number_sources(),
            width: config.processing_width,
            height: config.processing_height,
            target_fps: DEFAULT_STUB_FPS,
            max_batches: None,
        }
    }
}

pub struct SyntheticPipeline {
    config: SyntheticConfig,
    stop: Arc<AtomicBool>,
    batch_count: u64,
}

impl SyntheticPipeline {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            batch_count: 0,
        }
    }

    /// Flag that ends `run` after the current batch.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    fn next_batch(&mut self) -> Result<FrameBatch<BatchSurface>> {
        let frame_number = self.batch_count;
        self.batch_count += 1;

        let mut surfaces = Vec::with_capacity(self.config.number_sources);
        let mut frames = Vec::with_capacity(self.config.number_sources);
        for stream_index in 0..self.config.number_sources {
            surfaces.push(self.synthetic_surface(stream_index, frame_number)?);
            frames.push(FrameEvent::new(
                stream_index,
                stream_index,
                scene_objects(stream_index, frame_number),
            ));
        }
        Ok(FrameBatch {
            surface: BatchSurface::new(surfaces),
            frames,
        })
    }

    fn synthetic_surface(&self, stream_index: usize, frame_number: u64) -> Result<RawSurface> {
        let (w, h) = (self.config.width, self.config.height);
        let shade = ((frame_number / SCENE_FRAMES) as u8).wrapping_mul(37);
        let tint = (stream_index as u8).wrapping_mul(61);
        let px = [shade, tint, shade ^ tint, 255];
        RawSurface::new(w, h, PixelFormat::Rgba, px.repeat(w as usize * h as usize))
    }
}

impl MediaPipeline for SyntheticPipeline {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn run(&mut self, probe: &mut BatchProbe<'_>) -> Result<()> {
        log::info!(
            "synthetic pipeline: {} stream(s) at {}x{}, {} fps",
            self.config.number_sources,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        let frame_interval = Duration::from_secs(1) / self.config.target_fps.max(1);
        while !self.stop.load(Ordering::SeqCst) {
            if let Some(max) = self.config.max_batches {
                if self.batch_count >= max {
                    break;
                }
            }
            let batch = self.next_batch()?;
            let ProbeReturn::Ok = probe(&batch);
            std::thread::sleep(frame_interval);
        }
        log::info!("synthetic pipeline stopped after {} batches", self.batch_count);
        Ok(())
    }
}

/// Object ids present on `stream_index` at `frame_number`.
///
/// Each scene is 40% empty, 30% one object, 30% two objects. Ids change every
/// scene and never collide across streams.
fn scene_objects(stream_index: usize, frame_number: u64) -> Vec<ObjectId> {
    let scene = frame_number / SCENE_FRAMES;
    let phase = frame_number % SCENE_FRAMES;
    let base = stream_index as u64 * 1_000_000 + scene * 2;
    match phase {
        0..=39 => Vec::new(),
        40..=69 => vec![base],
        _ => vec![base, base + 1],
    }
}

// ----------------------------------------------------------------------------
// Wiring
// ----------------------------------------------------------------------------

/// Pick a pipeline for `config`. Only `stub://` sources are built in; set
/// `CAPTURE_PIPELINE=stub` to force the synthetic pipeline for any source.
pub fn pipeline_for(config: &RunConfig) -> Result<SyntheticPipeline> {
    let forced = std::env::var("CAPTURE_PIPELINE")
        .map(|v| v.trim() == "stub")
        .unwrap_or(false);
    if !forced {
        if let Some(src) = config
            .sources
            .iter()
            .find(|s| !s.uri.starts_with(STUB_SCHEME))
        {
            bail!(
                "source '{}' ({}) needs a vendor media pipeline; only {} sources are built in",
                src.name,
                src.uri,
                STUB_SCHEME
            );
        }
    }
    Ok(SyntheticPipeline::new(SyntheticConfig::from_run_config(config)))
}

/// Prepare output directories, attach a capture controller to `pipeline`, and run it.
pub fn run_pipeline(
    config: &RunConfig,
    output_root: &Path,
    pipeline: &mut dyn MediaPipeline,
) -> Result<CaptureStats> {
    let store = ImageStore::new(output_root);
    store.prepare(config.number_sources())?;

    let engine = CaptureEngine::new(
        config.number_sources(),
        config.queue_size,
        config.image_timer(),
    );
    let mut controller = CaptureController::new(engine, store);

    log::info!(
        "{} pipeline running: queue_size={} image_timer={}s",
        pipeline.name(),
        config.queue_size,
        config.image_timer_secs
    );
    for (index, source) in config.sources.iter().enumerate() {
        log::info!("stream {}: {} -> {}", index, source.name, source.uri);
    }

    pipeline.run(&mut |batch| controller.on_batch(batch))?;

    let stats = controller.stats();
    log::info!(
        "capture stats: batches={} frames={} positive={} negative={} failed={}",
        stats.batches,
        stats.frames,
        stats.positive_saved,
        stats.negative_saved,
        stats.failed
    );
    Ok(stats)
}
