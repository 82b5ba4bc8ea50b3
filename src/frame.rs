//! Frame callback boundary.
//!
//! The media pipeline hands the capture layer one `FrameBatch` per processed
//! batch. Each batch carries:
//! - A `FrameSurface`: the batched pixel buffer, addressable by batch index
//! - One `FrameEvent` per frame: stream index, batch index, detected object ids
//!
//! Pixel data only leaves the surface through `FrameSurface::extract`, which
//! copies a single frame out of the batch. Everything else sees ids and indices.

use anyhow::{anyhow, bail, Result};

use crate::tracker::ObjectId;

// ----------------------------------------------------------------------------
// Frame events
// ----------------------------------------------------------------------------

/// Per-frame detection output produced by the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameEvent {
    /// Source index (`stream_<i>` directory).
    pub stream_index: usize,
    /// Position of this frame inside the batched surface.
    pub batch_index: usize,
    /// Object ids attached to this frame by the tracker. May be empty.
    pub object_ids: Vec<ObjectId>,
}

impl FrameEvent {
    pub fn new(stream_index: usize, batch_index: usize, object_ids: Vec<ObjectId>) -> Self {
        Self {
            stream_index,
            batch_index,
            object_ids,
        }
    }

    pub fn has_detections(&self) -> bool {
        !self.object_ids.is_empty()
    }
}

/// One processed batch: a shared surface plus the frames it contains.
pub struct FrameBatch<S: FrameSurface> {
    pub surface: S,
    pub frames: Vec<FrameEvent>,
}

/// Acknowledgement returned to the pipeline after a batch callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Keep processing.
    Ok,
}

// ----------------------------------------------------------------------------
// Surfaces
// ----------------------------------------------------------------------------

/// Pixel layout of an extracted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Rgb,
    Bgr,
    /// Semi-planar YUV 4:2:0. Produced by hardware decoders; not encodable here.
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats. `None` for planar layouts.
    pub fn packed_bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => Some(4),
            PixelFormat::Rgb | PixelFormat::Bgr => Some(3),
            PixelFormat::Nv12 => None,
        }
    }
}

/// A single frame copied out of a batch surface.
#[derive(Clone, Debug)]
pub struct RawSurface {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    data: Vec<u8>,
}

impl RawSurface {
    /// Wrap pixel bytes. Packed formats must be exactly `width * height * bpp` bytes.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("surface dimensions must be non-zero ({}x{})", width, height);
        }
        if let Some(bpp) = format.packed_bytes_per_pixel() {
            let expected = width as usize * height as usize * bpp;
            if data.len() != expected {
                bail!(
                    "{:?} surface {}x{} expects {} bytes, got {}",
                    format,
                    width,
                    height,
                    expected,
                    data.len()
                );
            }
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Batched pixel buffer owned by the pipeline.
///
/// `extract` copies one frame so the caller never holds a reference into
/// pipeline-owned memory past the callback.
pub trait FrameSurface {
    fn extract(&self, batch_index: usize) -> Result<RawSurface>;
}

/// In-memory batch surface: one `RawSurface` per batch slot.
#[derive(Clone, Debug, Default)]
pub struct BatchSurface {
    frames: Vec<RawSurface>,
}

impl BatchSurface {
    pub fn new(frames: Vec<RawSurface>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSurface for BatchSurface {
    fn extract(&self, batch_index: usize) -> Result<RawSurface> {
        self.frames.get(batch_index).cloned().ok_or_else(|| {
            anyhow!(
                "batch index {} out of range (batch size {})",
                batch_index,
                self.frames.len()
            )
        })
    }
}
