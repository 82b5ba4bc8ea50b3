//! Frame persistence.
//!
//! Captured frames are written as JPEG files under:
//!
//! ```text
//! <root>/positive/stream_<i>/img_<YYYYmmdd_HHMMSS_ffffff>.jpg
//! <root>/negative/stream_<i>/img_<YYYYmmdd_HHMMSS_ffffff>.jpg
//! ```
//!
//! Directories are created once by `ImageStore::prepare`. File names come from
//! a microsecond local timestamp and are not checked for collisions.

use anyhow::{bail, Context, Result};
use image::{ImageFormat, RgbImage};
use std::path::PathBuf;

use crate::capture::{CaptureKind, CaptureRequest};
use crate::frame::{FrameSurface, PixelFormat, RawSurface};

const POSITIVE_DIR: &str = "positive";
const NEGATIVE_DIR: &str = "negative";

/// Destination for capture requests.
///
/// The capture controller calls this on the pipeline thread; implementations
/// should return quickly and report failures as errors rather than panicking.
pub trait CaptureSink {
    fn persist(
        &mut self,
        request: &CaptureRequest,
        surface: &dyn FrameSurface,
    ) -> Result<PathBuf>;
}

/// JPEG writer rooted at an output directory.
#[derive(Clone, Debug)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for a capture kind and stream.
    pub fn stream_dir(&self, kind: CaptureKind, stream_index: usize) -> PathBuf {
        let kind_dir = match kind {
            CaptureKind::Positive => POSITIVE_DIR,
            CaptureKind::Negative => NEGATIVE_DIR,
        };
        self.root.join(kind_dir).join(format!("stream_{}", stream_index))
    }

    /// Create positive/negative directories for streams `0..number_sources`.
    pub fn prepare(&self, number_sources: usize) -> Result<()> {
        for stream_index in 0..number_sources {
            for kind in [CaptureKind::Positive, CaptureKind::Negative] {
                let dir = self.stream_dir(kind, stream_index);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("create image directory {}", dir.display()))?;
            }
        }
        log::info!(
            "image directories ready under {} for {} stream(s)",
            self.root.display(),
            number_sources
        );
        Ok(())
    }

    /// Encode `frame` as JPEG into the stream directory for `kind`.
    pub fn write(
        &self,
        kind: CaptureKind,
        stream_index: usize,
        frame: RawSurface,
    ) -> Result<PathBuf> {
        let image = to_rgb_image(frame)?;
        let name = chrono::Local::now()
            .format("img_%Y%m%d_%H%M%S_%6f.jpg")
            .to_string();
        let path = self.stream_dir(kind, stream_index).join(name);
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("write capture {}", path.display()))?;
        Ok(path)
    }
}

impl CaptureSink for ImageStore {
    fn persist(
        &mut self,
        request: &CaptureRequest,
        surface: &dyn FrameSurface,
    ) -> Result<PathBuf> {
        let frame = surface.extract(request.batch_index)?;
        self.write(request.kind, request.stream_index, frame)
    }
}

/// Convert a packed surface into an RGB raster.
fn to_rgb_image(frame: RawSurface) -> Result<RgbImage> {
    let (width, height, format) = (frame.width, frame.height, frame.format);
    let rgb = match format {
        PixelFormat::Rgb => frame.into_data(),
        PixelFormat::Rgba => reorder(frame.data(), 4, [0, 1, 2]),
        PixelFormat::Bgra => reorder(frame.data(), 4, [2, 1, 0]),
        PixelFormat::Bgr => reorder(frame.data(), 3, [2, 1, 0]),
        PixelFormat::Nv12 => bail!("unsupported pixel format {:?} for capture", format),
    };
    match RgbImage::from_raw(width, height, rgb) {
        Some(image) => Ok(image),
        None => bail!("pixel buffer too small for {}x{} {:?}", width, height, format),
    }
}

fn reorder(data: &[u8], stride: usize, order: [usize; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / stride * 3);
    for px in data.chunks_exact(stride) {
        out.extend(order.iter().map(|&channel| px[channel]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BatchSurface;

    fn solid(format: PixelFormat, px: &[u8], width: u32, height: u32) -> RawSurface {
        let data = px.repeat((width * height) as usize);
        RawSurface::new(width, height, format, data).unwrap()
    }

    #[test]
    fn prepare_creates_both_roots_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        store.prepare(3).unwrap();
        for i in 0..3 {
            assert!(dir.path().join(format!("positive/stream_{}", i)).is_dir());
            assert!(dir.path().join(format!("negative/stream_{}", i)).is_dir());
        }
        assert!(!dir.path().join("positive/stream_3").exists());
    }

    #[test]
    fn bgra_is_converted_to_rgb() {
        let image = to_rgb_image(solid(PixelFormat::Bgra, &[10, 20, 30, 255], 2, 1)).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(image.get_pixel(1, 0).0, [30, 20, 10]);
    }

    #[test]
    fn rgba_drops_alpha() {
        let image = to_rgb_image(solid(PixelFormat::Rgba, &[1, 2, 3, 4], 1, 1)).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn nv12_is_rejected() {
        let frame = RawSurface::new(2, 2, PixelFormat::Nv12, vec![0; 6]).unwrap();
        assert!(to_rgb_image(frame).is_err());
    }

    #[test]
    fn persist_writes_jpeg_into_stream_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageStore::new(dir.path());
        store.prepare(2).unwrap();
        let surface = BatchSurface::new(vec![
            solid(PixelFormat::Rgba, &[0, 0, 0, 255], 8, 8),
            solid(PixelFormat::Rgba, &[200, 100, 50, 255], 8, 8),
        ]);
        let request = CaptureRequest {
            kind: CaptureKind::Negative,
            stream_index: 1,
            batch_index: 1,
        };
        let path = store.persist(&request, &surface).unwrap();
        assert!(path.starts_with(dir.path().join("negative/stream_1")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("img_") && name.ends_with(".jpg"));
        // img_ + 8 date + _ + 6 time + _ + 6 micros + .jpg
        assert_eq!(name.len(), 4 + 8 + 1 + 6 + 1 + 6 + 4);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn persist_fails_without_prepared_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageStore::new(dir.path());
        let surface = BatchSurface::new(vec![solid(PixelFormat::Rgb, &[1, 1, 1], 4, 4)]);
        let request = CaptureRequest {
            kind: CaptureKind::Positive,
            stream_index: 0,
            batch_index: 0,
        };
        assert!(store.persist(&request, &surface).is_err());
    }
}
