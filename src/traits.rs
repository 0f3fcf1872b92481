//! Core traits and types shared by the capture backends.

use std::io;
use std::time::Duration;

use crate::convert::{yuyv_pixel, Rgb};
use crate::error::Result;
use crate::request::CaptureRequest;

/// Pixel format representation (e.g., YUYV, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit luma).
    pub const GREY: Self = Self::new(b"GREY");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel encodings a capture request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    #[default]
    Rgb24,
    /// Packed 4:2:2 luma/chroma, 2 bytes per pixel.
    Yuyv422,
    /// 8-bit luma only, 1 byte per pixel.
    Luma8,
}

impl PixelFormat {
    /// The V4L2 FourCC for this format.
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Rgb24 => FourCC::RGB3,
            Self::Yuyv422 => FourCC::YUYV,
            Self::Luma8 => FourCC::GREY,
        }
    }

    /// Look up the format matching a FourCC.
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        [Self::Rgb24, Self::Yuyv422, Self::Luma8]
            .into_iter()
            .find(|format| format.fourcc() == fourcc)
    }

    /// Bytes used by one pixel.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgb24 => 3,
            Self::Yuyv422 => 2,
            Self::Luma8 => 1,
        }
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a tightly packed format specification.
    ///
    /// Stride and size saturate at `u32::MAX`. Use [`Format::packed_size`]
    /// to reject geometry that does not fit.
    #[must_use]
    pub const fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let stride = width.saturating_mul(pixel_format.bytes_per_pixel());
        let size = stride.saturating_mul(height);
        Self {
            width,
            height,
            fourcc: pixel_format.fourcc(),
            stride,
            size,
        }
    }

    /// Bytes in a tightly packed frame, or `None` if that overflows `u32`.
    #[must_use]
    pub const fn packed_size(width: u32, height: u32, pixel_format: PixelFormat) -> Option<u32> {
        match width.checked_mul(pixel_format.bytes_per_pixel()) {
            Some(stride) => stride.checked_mul(height),
            None => None,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// Read-only view of one captured frame.
///
/// Borrows the ready buffer, so it cannot outlive the next request.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    /// Frame bytes, `stride * height` long.
    pub data: &'a [u8],
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per row, including any padding.
    pub stride: usize,
    /// Encoding of `data`.
    pub format: PixelFormat,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl<'a> Frame<'a> {
    /// Bytes of row `y`, padding included.
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        let start = (y as usize).checked_mul(self.stride)?;
        self.data.get(start..start.checked_add(self.stride)?)
    }

    /// Iterate over the rows of the frame.
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> {
        let data = self.data;
        data.chunks_exact(self.stride.max(1)).take(self.height as usize)
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` if the coordinates fall outside the frame. For YUYV
    /// frames the chroma pair shared with the horizontal neighbour is used.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width {
            return None;
        }
        let row = self.row(y)?;
        let x = x as usize;

        match self.format {
            PixelFormat::Yuyv422 => {
                // [Y0 Cb Y1 Cr] repeats, each pair of pixels shares Cb and Cr
                let pair = (x & !1) * 2;
                let luma = *row.get(pair + (x & 1) * 2)?;
                let cb = *row.get(pair + 1)?;
                // A trailing even pixel has no partner and reuses its own chroma.
                let cr = if (x | 1) < self.width as usize {
                    *row.get(pair + 3)?
                } else {
                    cb
                };
                Some(yuyv_pixel(luma, cb, cr))
            }
            PixelFormat::Rgb24 => {
                let px = row.get(x * 3..x * 3 + 3)?;
                Some(Rgb::new(*px.first()?, *px.get(1)?, *px.get(2)?))
            }
            PixelFormat::Luma8 => {
                let l = *row.get(x)?;
                Some(Rgb::new(l, l, l))
            }
        }
    }
}

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Torn down.
    Closed,
    /// Source open, not yet configured.
    Opened,
    /// Negotiated, buffers allocated, stream not armed.
    Configured,
    /// Armed and delivering frames.
    Streaming,
    /// A fatal error occurred; the session must be reopened.
    Failed,
}

/// Which acquisition path a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Memory-mapped V4L2 capture.
    DirectCapture,
    /// Software decoding of an Annex-B bitstream.
    DecodedStream,
}

/// Kernel-assigned description of one capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Buffer index.
    pub index: u32,
    /// Buffer length in bytes.
    pub length: usize,
    /// Offset to pass to `mmap`.
    pub offset: u32,
}

/// A buffer returned by the device, filled with one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dequeued {
    /// Index of the filled buffer.
    pub index: u32,
    /// Capture metadata reported by the driver.
    pub metadata: FrameMetadata,
}

/// A region of device memory mapped into the process.
///
/// Dropping the region unmaps it.
pub trait MappedRegion {
    /// The mapped bytes.
    fn as_slice(&self) -> &[u8];

    /// The mapped bytes, writable.
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Called after the device hands the buffer back, before the CPU reads it.
    fn begin_cpu_access(&mut self) {}
}

/// The V4L2 control surface used by the direct capture backend.
pub trait CameraDevice {
    /// Mapping type produced by `map_buffer`.
    type Mapping: MappedRegion;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Set the frame interval to `1 / fps`.
    fn set_frame_rate(&mut self, fps: u32) -> io::Result<()>;

    /// Ask for `count` mmap buffers. Returns how many the driver granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Describe buffer `index`.
    fn query_buffer(&self, index: u32) -> io::Result<BufferDescriptor>;

    /// Map a buffer into the process.
    fn map_buffer(&self, descriptor: &BufferDescriptor) -> io::Result<Self::Mapping>;

    /// Hand buffer `index` to the driver for filling.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Block until the driver returns a filled buffer.
    fn dequeue_buffer(&mut self) -> io::Result<Dequeued>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming. All queued buffers return to the application.
    fn stream_off(&mut self) -> io::Result<()>;
}

/// The acquisition protocol every backend implements.
pub trait FrameSource {
    /// Negotiate geometry, format and rate for `request`.
    fn configure(&mut self, request: &CaptureRequest) -> Result<()>;

    /// Start delivering frames.
    fn arm(&mut self) -> Result<()>;

    /// Give the last frame back and ask for the next one.
    fn request_frame(&mut self) -> Result<()>;

    /// Block until a frame is available.
    fn wait_frame(&mut self) -> Result<Frame<'_>>;

    /// Bytes per row of delivered frames.
    fn row_stride(&self) -> usize;

    /// Width and height of delivered frames, once known.
    fn geometry(&self) -> Option<(u32, u32)>;

    /// Stop delivering frames and give every resource back.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An image produced by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bytes per row of `plane`.
    pub stride: usize,
    /// First image plane (luma), at least `stride * height` bytes.
    pub plane: Vec<u8>,
}

/// A push-based video decoder.
pub trait VideoDecoder {
    /// Submit one access unit.
    fn submit(&mut self, unit: &[u8]) -> std::result::Result<(), String>;

    /// Release pictures the decoder is still holding once input has ended.
    fn flush(&mut self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Take the next ready image, if any.
    fn poll(&mut self) -> Option<DecodedImage>;
}
