//! Capture requests.

use std::path::{Path, PathBuf};

use crate::error::{CaptureError, Result};
use crate::traits::{Format, PixelFormat};

/// Smallest buffer count the acquisition protocol can run with.
pub const MIN_BUFFERS: u32 = 1;

/// Largest buffer count ever requested from a device.
pub const MAX_BUFFERS: u32 = 10;

/// What the caller wants from a capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub fps: u32,
    /// Requested pixel format; `None` means RGB24.
    pub pixel_format: Option<PixelFormat>,
    /// Device node or bitstream file.
    pub path: PathBuf,
    /// Buffers to ask the device for.
    pub buffer_count: u32,
}

impl CaptureRequest {
    /// A 640x480, 30 fps request for `path` with one buffer.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            pixel_format: None,
            path: path.into(),
            buffer_count: MIN_BUFFERS,
        }
    }

    /// Set the frame geometry.
    #[must_use]
    pub const fn with_geometry(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the frame rate.
    #[must_use]
    pub const fn with_frame_rate(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the pixel format.
    #[must_use]
    pub const fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = Some(pixel_format);
        self
    }

    /// Set how many buffers to request.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// The source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The pixel format, with the RGB24 default applied.
    pub fn resolved_format(&self) -> PixelFormat {
        self.pixel_format.unwrap_or_default()
    }

    /// The tightly packed format this request describes.
    pub fn format(&self) -> Format {
        Format::new(self.width, self.height, self.resolved_format())
    }

    /// Buffer count clamped to the pool capacity.
    pub fn buffers_to_request(&self) -> u32 {
        self.buffer_count.min(MAX_BUFFERS)
    }

    /// Reject zero or oversized geometry and a zero rate.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidRequest(format!(
                "geometry must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        let pixel_format = self.resolved_format();
        if Format::packed_size(self.width, self.height, pixel_format).is_none() {
            return Err(CaptureError::InvalidRequest(format!(
                "{}x{} {pixel_format:?} frame does not fit in 32-bit sizes",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(CaptureError::InvalidRequest(
                "frame rate must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
