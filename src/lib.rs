//! Capture Sentinel
//!
//! Detection-triggered still capture for multi-stream video analytics, plus the
//! supervisor that owns the pipeline process.
//!
//! # Architecture
//!
//! Two processes, sharing only the filesystem:
//!
//! 1. **Supervisor** (`capture_supervisor`): polls a signal directory for
//!    `trigger.txt` / `quit.txt`, validates `config.json`, and keeps at most one
//!    pipeline process alive.
//! 2. **Pipeline** (`capture_pipeline`): receives the validated `RunConfig` as
//!    its sole argument and runs the media pipeline. For every processed batch,
//!    the `CaptureController` decides which frames to persist.
//!
//! # Module Structure
//!
//! - `tracker`: per-stream recency window of object ids
//! - `capture`: capture decisions (positive / negative) and the batch controller
//! - `frame`: frame callback boundary types
//! - `persist`: JPEG output under `positive/` and `negative/`
//! - `config`: `config.json` loading and validation
//! - `supervisor`: signal files and pipeline process lifecycle
//! - `pipeline`: media pipeline boundary and the synthetic pipeline
//! - `probe`: startup source reachability check

pub mod capture;
pub mod config;
pub mod frame;
pub mod persist;
pub mod pipeline;
pub mod probe;
pub mod supervisor;
pub mod tracker;

pub use capture::{
    CaptureController, CaptureEngine, CaptureKind, CaptureRequest, CaptureStats,
    NegativeCaptureTimer,
};
pub use config::{ConfigLoader, RunConfig, SourceType, StreamSource, DEFAULT_QUEUE_SIZE};
pub use frame::{
    BatchSurface, FrameBatch, FrameEvent, FrameSurface, PixelFormat, ProbeReturn, RawSurface,
};
pub use persist::{CaptureSink, ImageStore};
pub use pipeline::{run_pipeline, MediaPipeline, SyntheticConfig, SyntheticPipeline};
pub use probe::{all_reachable, probe_sources, ProbeOutcome};
pub use supervisor::{
    ChildExit, CommandLauncher, PipelineChild, PipelineLauncher, ProcessChild, Signal,
    SignalWatcher, Supervisor, SupervisorSettings, SupervisorState, QUIT_FILE, TRIGGER_FILE,
};
pub use tracker::{ObjectId, StreamTracker};
