//! Direct capture backend: memory-mapped V4L2 streaming.

use std::io;

use tracing::{debug, info, trace, warn};

use crate::error::{CaptureError, Result};
use crate::pool::BufferPool;
use crate::request::{CaptureRequest, MIN_BUFFERS};
use crate::traits::{CameraDevice, Format, Frame, FrameSource, PixelFormat};

/// Width, height and pixel format of the last successful negotiation.
type Geometry = (u32, u32, PixelFormat);

/// Frame source driving a [`CameraDevice`] through the queue/dequeue handshake.
pub struct DirectCapture<D: CameraDevice> {
    // Declared before `device` so mappings are dropped before the handle closes.
    pool: BufferPool<D::Mapping>,
    device: D,
    negotiated: Option<(Geometry, Format)>,
    fps: Option<u32>,
    streaming: bool,
}

impl<D: CameraDevice> DirectCapture<D> {
    /// Wrap a device that advertises video capture.
    pub fn new(device: D) -> Result<Self> {
        let caps = device.capabilities();
        if !caps.can_capture {
            return Err(CaptureError::NoCaptureCapability(caps.card.clone()));
        }

        Ok(Self {
            pool: BufferPool::new(),
            device,
            negotiated: None,
            fps: None,
            streaming: false,
        })
    }

    /// The underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The buffer pool.
    pub const fn pool(&self) -> &BufferPool<D::Mapping> {
        &self.pool
    }

    /// Whether the device is streaming.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Stop streaming and drop every mapping.
    fn halt(&mut self) -> Result<()> {
        if self.streaming {
            self.device
                .stream_off()
                .map_err(CaptureError::StreamArmFailed)?;
            self.streaming = false;
        }
        self.pool.release(&mut self.device)?;
        self.negotiated = None;
        self.fps = None;
        Ok(())
    }

    fn negotiate(&mut self, request: &CaptureRequest) -> Result<Format> {
        let format = request.format();
        let actual = self
            .device
            .set_format(&format)
            .map_err(|source| CaptureError::FormatRejected {
                format: format.clone(),
                source,
            })?;

        if PixelFormat::from_fourcc(actual.fourcc) != Some(request.resolved_format()) {
            return Err(CaptureError::FormatRejected {
                format,
                source: io::Error::other(format!(
                    "driver substituted {}",
                    String::from_utf8_lossy(&actual.fourcc.0)
                )),
            });
        }
        if actual.width == 0 || actual.height == 0 {
            return Err(CaptureError::FormatRejected {
                format,
                source: io::Error::other("driver reported an empty frame"),
            });
        }

        if actual.width != format.width || actual.height != format.height {
            info!(
                requested_width = format.width,
                requested_height = format.height,
                width = actual.width,
                height = actual.height,
                "driver adjusted frame size"
            );
        }
        Ok(actual)
    }
}

impl<D: CameraDevice> FrameSource for DirectCapture<D> {
    fn configure(&mut self, request: &CaptureRequest) -> Result<()> {
        if self.reallocate_if_geometry_changed(request)? {
            return Ok(());
        }
        if self.fps == Some(request.fps) {
            trace!("configuration unchanged");
            return Ok(());
        }
        self.set_rate(request.fps)
    }

    fn arm(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }

        self.device
            .stream_on()
            .map_err(CaptureError::StreamArmFailed)?;
        self.streaming = true;
        info!(buffers = self.pool.len(), "stream armed");

        // Priming wait: the first live request must find a filled pipeline.
        let primed = self
            .device
            .dequeue_buffer()
            .map_err(CaptureError::DequeueFailed)
            .and_then(|dequeued| self.pool.mark_ready(&mut self.device, dequeued));

        if let Err(err) = primed {
            if let Err(halt_err) = self.halt() {
                warn!(error = %halt_err, "failed to halt after priming error");
            }
            return Err(err);
        }
        Ok(())
    }

    fn request_frame(&mut self) -> Result<()> {
        self.pool.requeue_ready(&mut self.device)
    }

    fn wait_frame(&mut self) -> Result<Frame<'_>> {
        let dequeued = self
            .device
            .dequeue_buffer()
            .map_err(CaptureError::DequeueFailed)?;
        trace!(
            index = dequeued.index,
            sequence = dequeued.metadata.sequence,
            "dequeued buffer"
        );
        self.pool.mark_ready(&mut self.device, dequeued)?;

        let Some((geometry, format)) = self.negotiated.as_ref() else {
            return Err(CaptureError::DequeueFailed(io::Error::other(
                "no negotiated format",
            )));
        };
        self.pool
            .ready_frame(format.width, format.height, geometry.2)
            .ok_or_else(|| CaptureError::DequeueFailed(io::Error::other("buffer too small")))
    }

    fn row_stride(&self) -> usize {
        self.negotiated
            .as_ref()
            .map_or(0, |(_, format)| self.pool.row_stride(format.height))
    }

    fn geometry(&self) -> Option<(u32, u32)> {
        self.negotiated
            .as_ref()
            .map(|(_, format)| (format.width, format.height))
    }

    fn shutdown(&mut self) -> Result<()> {
        self.halt()
    }
}

impl<D: CameraDevice> DirectCapture<D> {
    /// Renegotiate and remap when width, height or pixel format differ from
    /// the last successful configuration. Returns whether it did.
    ///
    /// Streaming is halted and every slot unmapped before the new format is
    /// requested. A buffer count below the minimum is rejected before any
    /// device call.
    pub fn reallocate_if_geometry_changed(&mut self, request: &CaptureRequest) -> Result<bool> {
        let count = request.buffers_to_request();
        if count < MIN_BUFFERS {
            return Err(CaptureError::BufferCountInsufficient {
                requested: count,
                granted: 0,
            });
        }

        let target = (request.width, request.height, request.resolved_format());
        if !self.pool.is_empty()
            && self.negotiated.as_ref().map(|(geometry, _)| *geometry) == Some(target)
        {
            return Ok(false);
        }

        if !self.pool.is_empty() || self.streaming {
            debug!(?target, "geometry changed, halting capture to reallocate");
            self.halt()?;
        }
        let format = self.negotiate(request)?;
        self.set_rate(request.fps)?;
        self.pool.allocate(&mut self.device, count)?;
        // Recorded only once buffers exist, so a failed configure retries from scratch.
        self.negotiated = Some((target, format));
        Ok(true)
    }

    fn set_rate(&mut self, fps: u32) -> Result<()> {
        self.device
            .set_frame_rate(fps)
            .map_err(|source| CaptureError::RateRejected { fps, source })?;
        self.fps = Some(fps);
        Ok(())
    }
}

impl<D: CameraDevice> Drop for DirectCapture<D> {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(err) = self.device.stream_off() {
                warn!(error = %err, "failed to stop streaming on teardown");
            }
        }
    }
}
