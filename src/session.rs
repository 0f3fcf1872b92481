//! Device sessions: backend selection and the capture state machine.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use tracing::{debug, info, warn};

use crate::bitstream::starts_with_start_code;
use crate::decoded::{DecodedStream, CHUNK_SIZE};
use crate::decoder::OpenH264Decoder;
use crate::device::V4L2Device;
use crate::direct::DirectCapture;
use crate::error::{CaptureError, Result};
use crate::request::CaptureRequest;
use crate::traits::{Backend, CameraDevice, Frame, FrameSource, SessionState, VideoDecoder};

/// An open capture source and the backend chosen for it.
///
/// Teardown happens on drop; [`DeviceSession::close`] does the same and
/// reports errors.
pub struct DeviceSession {
    state: SessionState,
    backend: Backend,
    source: Box<dyn FrameSource>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("backend", &self.backend)
            .field("geometry", &self.source.geometry())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Open `request.path` and pick a backend for it.
    ///
    /// A V4L2 node that can capture video gets the direct backend. Anything
    /// else that opens with an Annex-B start code is decoded in software.
    pub fn open_and_probe(request: &CaptureRequest) -> Result<Self> {
        request.validate()?;
        let path = request.path();

        let file = File::open(path).map_err(|source| CaptureError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;

        match V4L2Device::open(path) {
            Ok(device) => {
                drop(file);
                debug!(path = %path.display(), "source is a V4L2 node");
                return Self::with_device(device);
            }
            Err(err) => debug!(path = %path.display(), error = %err, "not a V4L2 node"),
        }

        let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
        let head = reader.fill_buf().map_err(CaptureError::SourceRead)?;
        if !starts_with_start_code(head) {
            return Err(CaptureError::NoCaptureCapability(
                path.display().to_string(),
            ));
        }

        debug!(path = %path.display(), "source is an Annex-B bitstream");
        Ok(Self::with_decoder(reader, OpenH264Decoder::new))
    }

    /// Session over a kernel capture device.
    pub fn with_device<D>(device: D) -> Result<Self>
    where
        D: CameraDevice + 'static,
    {
        let card = device.capabilities().card.clone();
        let source = DirectCapture::new(device)?;
        info!(card = %card, "opened capture device");

        Ok(Self {
            state: SessionState::Opened,
            backend: Backend::DirectCapture,
            source: Box::new(source),
        })
    }

    /// Session decoding a bitstream read from `reader`.
    pub fn with_decoder<R, D, F>(reader: R, factory: F) -> Self
    where
        R: Read + 'static,
        D: VideoDecoder + 'static,
        F: FnMut() -> std::result::Result<D, String> + 'static,
    {
        info!("opened bitstream source");
        Self {
            state: SessionState::Opened,
            backend: Backend::DecodedStream,
            source: Box::new(DecodedStream::new(reader, factory)),
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Backend chosen when the session was opened.
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// Frame geometry, once negotiated or decoded.
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.source.geometry()
    }

    /// Bytes per row of delivered frames.
    pub fn row_stride(&self) -> usize {
        self.source.row_stride()
    }

    /// Negotiate `request` and start streaming.
    ///
    /// Repeating a request is cheap; buffers are only reallocated when the
    /// geometry or pixel format changes.
    pub fn configure(&mut self, request: &CaptureRequest) -> Result<()> {
        self.ensure_open("configure")?;
        request.validate()?;

        if let Err(err) = self.source.configure(request) {
            return Err(self.record_failure(err, SessionState::Opened));
        }
        self.state = SessionState::Configured;

        if let Err(err) = self.source.arm() {
            return Err(self.record_failure(err, SessionState::Opened));
        }
        self.state = SessionState::Streaming;

        info!(
            width = request.width,
            height = request.height,
            fps = request.fps,
            backend = ?self.backend,
            "session streaming"
        );
        Ok(())
    }

    /// Give the previous frame back and ask for the next one.
    pub fn request_frame(&mut self) -> Result<()> {
        self.ensure_streaming("request_frame")?;
        self.source
            .request_frame()
            .map_err(|err| self.record_failure(err, SessionState::Streaming))
    }

    /// Block until the requested frame is available.
    ///
    /// The frame borrows the session, so it must be dropped before the next
    /// [`request_frame`](Self::request_frame).
    pub fn wait_frame(&mut self) -> Result<Frame<'_>> {
        self.ensure_streaming("wait_frame")?;
        match self.source.wait_frame() {
            Ok(frame) => Ok(frame),
            Err(err) => {
                if err.is_fatal() {
                    warn!(error = %err, "session failed");
                    self.state = SessionState::Failed;
                }
                Err(err)
            }
        }
    }

    /// Stop streaming, unmap every buffer and close the source.
    pub fn close(mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.source.shutdown()
    }

    fn record_failure(&mut self, err: CaptureError, otherwise: SessionState) -> CaptureError {
        if err.is_fatal() {
            warn!(error = %err, "session failed");
            self.state = SessionState::Failed;
        } else {
            self.state = otherwise;
        }
        err
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Failed | SessionState::Closed => Err(CaptureError::InvalidState {
                operation,
                state: self.state,
            }),
            _ => Ok(()),
        }
    }

    fn ensure_streaming(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Streaming {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}
