//! Decoded stream backend: software decoding of an Annex-B H.264 source.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::bitstream::AnnexBParser;
use crate::error::{CaptureError, Result};
use crate::request::CaptureRequest;
use crate::traits::{
    DecodedImage, Frame, FrameMetadata, FrameSource, PixelFormat, SessionState, VideoDecoder,
};

/// Bytes read from the source per refill.
pub const CHUNK_SIZE: usize = 4096;

/// Builds the decoder on first configuration.
pub type DecoderFactory<D> = Box<dyn FnMut() -> std::result::Result<D, String>>;

const fn not_configured() -> CaptureError {
    CaptureError::InvalidState {
        operation: "wait_frame",
        state: SessionState::Opened,
    }
}

/// Frame source that pulls bytes from a reader and decodes them.
pub struct DecodedStream<R, D> {
    reader: R,
    factory: DecoderFactory<D>,
    decoder: Option<D>,
    parser: AnnexBParser,
    pending: VecDeque<DecodedImage>,
    current: Option<DecodedImage>,
    chunk: Vec<u8>,
    exhausted: bool,
    sequence: u32,
    fps: u32,
    geometry: Option<(u32, u32)>,
}

impl<R: Read, D: VideoDecoder> DecodedStream<R, D> {
    /// Decode frames read from `reader` with a decoder built by `factory`.
    pub fn new<F>(reader: R, factory: F) -> Self
    where
        F: FnMut() -> std::result::Result<D, String> + 'static,
    {
        Self {
            reader,
            factory: Box::new(factory),
            decoder: None,
            parser: AnnexBParser::new(),
            pending: VecDeque::new(),
            current: None,
            chunk: vec![0; CHUNK_SIZE],
            exhausted: false,
            sequence: 0,
            fps: 0,
            geometry: None,
        }
    }

    /// Whether the source has been read to the end.
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Images decoded but not yet delivered.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Read one chunk and decode every unit it completes.
    fn refill(&mut self) -> Result<()> {
        let read = loop {
            match self.reader.read(&mut self.chunk) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(CaptureError::SourceRead(err)),
            }
        };

        let mut units = Vec::new();
        if read == 0 {
            self.exhausted = true;
            debug!("bitstream exhausted, flushing parser");
            if let Some(unit) = self.parser.flush().map_err(CaptureError::MalformedBitstream)? {
                units.push(unit);
            }
        } else {
            let input = self.chunk.get(..read).unwrap_or_default();
            let (_, mut unit) = self
                .parser
                .parse(input)
                .map_err(CaptureError::MalformedBitstream)?;
            while let Some(complete) = unit {
                units.push(complete);
                unit = self
                    .parser
                    .parse(&[])
                    .map_err(CaptureError::MalformedBitstream)?
                    .1;
            }
        }

        for unit in &units {
            self.decode(unit)?;
        }
        if self.exhausted {
            self.drain_decoder()?;
        }
        Ok(())
    }

    fn decode(&mut self, unit: &[u8]) -> Result<()> {
        trace!(len = unit.len(), "submitting NAL unit");
        let decoder = self.decoder.as_mut().ok_or_else(not_configured)?;
        decoder
            .submit(unit)
            .map_err(CaptureError::MalformedBitstream)?;
        self.pending.extend(std::iter::from_fn(|| decoder.poll()));
        Ok(())
    }

    /// Pull out pictures the decoder held back for reordering.
    fn drain_decoder(&mut self) -> Result<()> {
        let decoder = self.decoder.as_mut().ok_or_else(not_configured)?;
        decoder.flush().map_err(CaptureError::MalformedBitstream)?;
        self.pending.extend(std::iter::from_fn(|| decoder.poll()));
        Ok(())
    }

    fn timestamp(&self, sequence: u32) -> Duration {
        if self.fps == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(u64::from(sequence) * 1_000_000 / u64::from(self.fps))
    }

    fn deliver(&mut self, image: DecodedImage) -> Result<Frame<'_>> {
        let len = image.stride * image.height as usize;
        if image.plane.len() < len {
            return Err(CaptureError::MalformedBitstream(format!(
                "decoded plane holds {} bytes, expected {len}",
                image.plane.len()
            )));
        }

        if self.geometry != Some((image.width, image.height)) {
            info!(width = image.width, height = image.height, "decoded geometry");
            self.geometry = Some((image.width, image.height));
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let metadata = FrameMetadata {
            sequence,
            timestamp: self.timestamp(sequence),
            bytes_used: u32::try_from(len).unwrap_or(u32::MAX),
        };

        let image: &DecodedImage = self.current.insert(image);
        Ok(Frame {
            data: image.plane.get(..len).unwrap_or_default(),
            width: image.width,
            height: image.height,
            stride: image.stride,
            format: PixelFormat::Luma8,
            metadata,
        })
    }
}

impl<R: Read, D: VideoDecoder> FrameSource for DecodedStream<R, D> {
    fn configure(&mut self, request: &CaptureRequest) -> Result<()> {
        if self.decoder.is_none() {
            let decoder = (self.factory)().map_err(CaptureError::DecoderInitFailed)?;
            self.decoder = Some(decoder);
            debug!("decoder context created");
        }
        self.fps = request.fps;
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        Ok(())
    }

    fn request_frame(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<Frame<'_>> {
        loop {
            if let Some(image) = self.pending.pop_front() {
                return self.deliver(image);
            }
            if self.exhausted {
                return Err(CaptureError::EndOfStream);
            }
            self.refill()?;
        }
    }

    fn row_stride(&self) -> usize {
        self.current.as_ref().map_or(0, |image| image.stride)
    }

    fn geometry(&self) -> Option<(u32, u32)> {
        self.geometry
    }
}
