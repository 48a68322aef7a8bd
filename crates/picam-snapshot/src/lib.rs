//! picam-snapshot: writes every Nth preview frame to disk as JPEG.
//!
//! Files are named `frame_<index>.jpg` and land in the configured directory
//! (the system temp dir by default). Quality is the encoder's default.

use std::path::PathBuf;

use image::{ImageFormat, RgbImage};
use picam_core::{Frame, PixelFormat};
use thiserror::Error;
use tracing::debug;

/// Destination for snapshot frames.
pub trait SnapshotSink {
    /// Persist `frame` as snapshot number `index`. Returns the written path.
    fn write(&self, index: u64, frame: &Frame) -> Result<PathBuf, SnapshotError>;
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Frame unusable for snapshot: {reason}")]
    InvalidFrame { reason: String },

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `true` when frame `index` is due for a snapshot. An interval of 0
/// disables snapshots.
pub fn is_snapshot_index(index: u64, interval: u64) -> bool {
    interval != 0 && index % interval == 0
}

// ── JpegSnapshotWriter ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JpegSnapshotWriter {
    dir: PathBuf,
}

impl JpegSnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index}.jpg"))
    }
}

impl SnapshotSink for JpegSnapshotWriter {
    fn write(&self, index: u64, frame: &Frame) -> Result<PathBuf, SnapshotError> {
        let image = to_rgb_image(frame)?;
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(index);
        image.save_with_format(&path, ImageFormat::Jpeg)?;
        debug!("Snapshot {} written to {}", index, path.display());
        Ok(path)
    }
}

/// JPEG has no alpha channel: RGBA frames are flattened to RGB.
fn to_rgb_image(frame: &Frame) -> Result<RgbImage, SnapshotError> {
    if !frame.is_well_formed() {
        return Err(SnapshotError::InvalidFrame {
            reason: format!(
                "{} bytes for {}x{} {:?}",
                frame.data.len(),
                frame.width,
                frame.height,
                frame.format
            ),
        });
    }

    let rgb = match frame.format {
        PixelFormat::Rgba => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };

    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| SnapshotError::InvalidFrame {
        reason: "pixel buffer does not match dimensions".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use picam_core::Resolution;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("picam-snapshot-{}", uuid::Uuid::new_v4()))
    }

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, 128, 255]);
            }
        }
        Frame {
            data: Bytes::from(data),
            width,
            height,
            timestamp_us: 0,
            format: PixelFormat::Rgba,
        }
    }

    #[test]
    fn cadence_is_every_sixtieth_frame() {
        let due: Vec<u64> = (0..200).filter(|i| is_snapshot_index(*i, 60)).collect();
        assert_eq!(due, vec![0, 60, 120, 180]);
    }

    #[test]
    fn zero_interval_disables_snapshots() {
        assert!((0..100).all(|i| !is_snapshot_index(i, 0)));
    }

    #[test]
    fn file_name_embeds_index() {
        let writer = JpegSnapshotWriter::new("/tmp");
        assert_eq!(writer.path_for(120), PathBuf::from("/tmp/frame_120.jpg"));
    }

    #[test]
    fn writes_decodable_jpeg() {
        let dir = scratch_dir();
        let writer = JpegSnapshotWriter::new(&dir);

        let path = writer.write(60, &gradient(64, 48)).expect("snapshot written");
        assert_eq!(path, dir.join("frame_60.jpg"));

        let decoded = image::open(&path).expect("valid JPEG");
        assert_eq!((decoded.width(), decoded.height()), (64, 48));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn alpha_channel_is_dropped() {
        let dir = scratch_dir();
        let writer = JpegSnapshotWriter::new(&dir);

        let frame = Frame::blank(Resolution::new(32, 16), PixelFormat::Rgba);
        let rgb = to_rgb_image(&frame).expect("well-formed frame");
        assert_eq!(rgb.as_raw().len(), 32 * 16 * 3);
        assert!(writer.write(0, &frame).is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_frame_is_rejected_without_touching_disk() {
        let dir = scratch_dir();
        let writer = JpegSnapshotWriter::new(&dir);
        let frame = Frame {
            data: Bytes::from_static(&[0u8; 7]),
            width: 4,
            height: 4,
            timestamp_us: 0,
            format: PixelFormat::Rgba,
        };

        let err = writer.write(0, &frame).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFrame { .. }));
        assert!(!dir.exists());
    }

    #[test]
    fn unwritable_directory_surfaces_io_error() {
        let file = std::env::temp_dir().join(format!("picam-not-a-dir-{}", uuid::Uuid::new_v4()));
        std::fs::write(&file, b"x").expect("scratch file");
        let writer = JpegSnapshotWriter::new(file.join("nested"));

        let err = writer.write(0, &gradient(8, 8)).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));

        let _ = std::fs::remove_file(&file);
    }
}
