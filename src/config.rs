//! Parameters for opening a capture session.

use std::path::{Path, PathBuf};

use crate::error::{CameraError, Result};
use crate::traits::{Format, FourCC, FrameInterval};

/// Default device node.
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Default number of mapped buffers.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// What to request from the driver when a session opens.
///
/// The driver may adjust any of these; the session keeps the negotiated
/// values, not the requested ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device node path.
    pub path: PathBuf,
    /// Requested frame width in pixels.
    pub width: u32,
    /// Requested frame height in pixels.
    pub height: u32,
    /// Requested pixel format.
    pub pixel_format: FourCC,
    /// Requested time per frame.
    pub interval: FrameInterval,
    /// Number of buffers to map.
    pub buffer_count: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DEVICE),
            width: 320,
            height: 240,
            pixel_format: FourCC::YUYV,
            interval: FrameInterval::new(1, 15),
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

impl CaptureConfig {
    /// Set the device node.
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Set the requested resolution.
    #[must_use]
    pub const fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the requested pixel format.
    #[must_use]
    pub const fn with_pixel_format(mut self, pixel_format: FourCC) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Set the requested frame interval, e.g. `(1, 30)` for 30 fps.
    #[must_use]
    pub const fn with_interval(mut self, numerator: u32, denominator: u32) -> Self {
        self.interval = FrameInterval::new(numerator, denominator);
        self
    }

    /// Set the number of buffers to map.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// The format to request during negotiation.
    pub fn format(&self) -> Format {
        Format::new(self.width, self.height, self.pixel_format)
    }

    /// Reject values no driver can satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::InvalidConfig(format!(
                "resolution {}x{} has a zero dimension",
                self.width, self.height
            )));
        }
        if self.interval.numerator == 0 || self.interval.denominator == 0 {
            return Err(CameraError::InvalidConfig(format!(
                "frame interval {} has a zero term",
                self.interval
            )));
        }
        if self.buffer_count == 0 {
            return Err(CameraError::InvalidConfig(
                "buffer count must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
