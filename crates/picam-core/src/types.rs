use bytes::Bytes;
use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Capture resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self { width: 1280, height: 720 };
    pub const FHD: Self = Self { width: 1920, height: 1080 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - PixelFormat

/// Pixel layout of [`Frame::data`]. The capture pipeline converts to RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgba => 4,
        }
    }

    /// GStreamer `video/x-raw` format name.
    pub fn caps_name(&self) -> &'static str {
        match self {
            Self::Rgba => "RGBA",
        }
    }
}

// MARK: - Frame

/// One decoded camera frame, tightly packed (no row padding).
///
/// Not `Clone`: a frame belongs to the loop iteration that read it and is
/// only ever lent to the display and snapshot stages.
#[derive(Debug)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub timestamp_us: u64,
    pub format: PixelFormat,
}

impl Frame {
    /// A frame of the given size with every byte set to zero.
    pub fn blank(resolution: Resolution, format: PixelFormat) -> Self {
        let len = resolution.total_pixels() as usize * format.bytes_per_pixel();
        Self {
            data: Bytes::from(vec![0u8; len]),
            width: resolution.width,
            height: resolution.height,
            timestamp_us: 0,
            format,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Byte length a frame of this size and format must have.
    pub fn expected_len(&self) -> usize {
        self.resolution().total_pixels() as usize * self.format.bytes_per_pixel()
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

// MARK: - ExitReason

/// Why a preview session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    QuitKey,
    ReadFailed,
    Interrupted,
    WindowClosed,
    DisplayFailed,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuitKey => write!(f, "quit key"),
            Self::ReadFailed => write!(f, "frame read failure"),
            Self::Interrupted => write!(f, "interrupt"),
            Self::WindowClosed => write!(f, "window closed"),
            Self::DisplayFailed => write!(f, "display failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_frame_matches_expected_len() {
        let frame = Frame::blank(Resolution::HD, PixelFormat::Rgba);
        assert_eq!(frame.data.len(), 1280 * 720 * 4);
        assert!(frame.is_well_formed());
        assert_eq!(frame.resolution(), Resolution::HD);
    }

    #[test]
    fn truncated_frame_is_not_well_formed() {
        let frame = Frame {
            data: Bytes::from_static(&[0u8; 12]),
            width: 2,
            height: 2,
            timestamp_us: 0,
            format: PixelFormat::Rgba,
        };
        assert!(!frame.is_well_formed());
    }
}
