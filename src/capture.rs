//! Capture decision engine.
//!
//! For every frame the pipeline delivers, decide whether to persist a still:
//!
//! - **Positive**: an object id not in the stream's recency window was detected.
//!   One request per new id, then the id is recorded.
//! - **Negative**: the frame has no detections and the negative-capture timer
//!   is due. The timer is reset on every negative capture.
//!
//! The negative timer is shared by all streams. A negative capture on any
//! stream resets it for every stream.
//!
//! `CaptureController` runs on the pipeline's processing thread. It never
//! blocks on anything but the sink and never lets a sink error escape: a failed
//! capture is logged and dropped.

use std::time::{Duration, Instant};

use crate::frame::{FrameBatch, FrameEvent, FrameSurface, ProbeReturn};
use crate::persist::CaptureSink;
use crate::tracker::StreamTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    Positive,
    Negative,
}

/// A decision to persist the frame at `batch_index` for `stream_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: CaptureKind,
    pub stream_index: usize,
    pub batch_index: usize,
}

// ----------------------------------------------------------------------------
// NegativeCaptureTimer
// ----------------------------------------------------------------------------

/// Soft timer gating negative captures. Checked opportunistically per frame.
#[derive(Clone, Debug)]
pub struct NegativeCaptureTimer {
    last_capture: Option<Instant>,
    interval: Duration,
}

impl NegativeCaptureTimer {
    /// A fresh timer is due immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            last_capture: None,
            interval,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_capture {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last_capture = Some(now);
    }
}

// ----------------------------------------------------------------------------
// CaptureEngine
// ----------------------------------------------------------------------------

/// Pure decision logic: trackers per stream plus the shared negative timer.
#[derive(Clone, Debug)]
pub struct CaptureEngine {
    trackers: Vec<StreamTracker>,
    timer: NegativeCaptureTimer,
}

impl CaptureEngine {
    pub fn new(number_sources: usize, queue_size: usize, interval: Duration) -> Self {
        Self {
            trackers: (0..number_sources)
                .map(|_| StreamTracker::new(queue_size))
                .collect(),
            timer: NegativeCaptureTimer::new(interval),
        }
    }

    pub fn number_sources(&self) -> usize {
        self.trackers.len()
    }

    pub fn tracker(&self, stream_index: usize) -> Option<&StreamTracker> {
        self.trackers.get(stream_index)
    }

    pub fn timer(&self) -> &NegativeCaptureTimer {
        &self.timer
    }

    /// Decide which captures `event` triggers at `now`, updating tracker and timer state.
    pub fn evaluate(&mut self, event: &FrameEvent, now: Instant) -> Vec<CaptureRequest> {
        let configured = self.trackers.len();
        let Some(tracker) = self.trackers.get_mut(event.stream_index) else {
            log::warn!(
                "frame for unknown stream {} ignored ({} configured)",
                event.stream_index,
                configured
            );
            return Vec::new();
        };

        let mut requests = Vec::new();
        for &id in &event.object_ids {
            if tracker.seen(id) {
                continue;
            }
            requests.push(CaptureRequest {
                kind: CaptureKind::Positive,
                stream_index: event.stream_index,
                batch_index: event.batch_index,
            });
            tracker.record(id);
        }

        if !event.has_detections() && self.timer.is_due(now) {
            requests.push(CaptureRequest {
                kind: CaptureKind::Negative,
                stream_index: event.stream_index,
                batch_index: event.batch_index,
            });
            self.timer.reset(now);
        }

        requests
    }
}

// ----------------------------------------------------------------------------
// CaptureController
// ----------------------------------------------------------------------------

/// Counters kept by the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub batches: u64,
    pub frames: u64,
    pub positive_saved: u64,
    pub negative_saved: u64,
    pub failed: u64,
}

/// Per-batch callback wiring the engine to a sink.
pub struct CaptureController<K: CaptureSink> {
    engine: CaptureEngine,
    sink: K,
    stats: CaptureStats,
}

impl<K: CaptureSink> CaptureController<K> {
    pub fn new(engine: CaptureEngine, sink: K) -> Self {
        Self {
            engine,
            sink,
            stats: CaptureStats::default(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub fn engine(&self) -> &CaptureEngine {
        &self.engine
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Handle one batch at the current instant.
    pub fn on_batch<S: FrameSurface>(&mut self, batch: &FrameBatch<S>) -> ProbeReturn {
        self.on_batch_at(batch, Instant::now())
    }

    /// Handle one batch at `now`. Always returns `ProbeReturn::Ok`.
    pub fn on_batch_at<S: FrameSurface>(
        &mut self,
        batch: &FrameBatch<S>,
        now: Instant,
    ) -> ProbeReturn {
        self.stats.batches += 1;
        for event in &batch.frames {
            self.stats.frames += 1;
            for request in self.engine.evaluate(event, now) {
                match self.sink.persist(&request, &batch.surface) {
                    Ok(path) => {
                        match request.kind {
                            CaptureKind::Positive => self.stats.positive_saved += 1,
                            CaptureKind::Negative => self.stats.negative_saved += 1,
                        }
                        log::debug!("saved {:?} capture {}", request.kind, path.display());
                    }
                    Err(e) => {
                        self.stats.failed += 1;
                        log::error!(
                            "{:?} capture for stream {} dropped: {:#}",
                            request.kind,
                            request.stream_index,
                            e
                        );
                    }
                }
            }
        }
        ProbeReturn::Ok
    }
}
