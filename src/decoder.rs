//! H.264 decoding through OpenH264.

use std::collections::VecDeque;

use openh264::decoder::{DecodedYUV, Decoder};
use openh264::formats::YUVSource;
use tracing::{debug, trace};

use crate::traits::{DecodedImage, VideoDecoder};

/// OpenH264-backed implementation of [`VideoDecoder`].
///
/// Decoded images are copied out of the decoder immediately, so several can
/// be pending at once.
pub struct OpenH264Decoder {
    decoder: Decoder,
    ready: VecDeque<DecodedImage>,
    frames_decoded: u64,
}

impl OpenH264Decoder {
    /// Create a new H.264 decoder.
    pub fn new() -> Result<Self, String> {
        let decoder = Decoder::new().map_err(|e| format!("{e:?}"))?;
        debug!("OpenH264 decoder created");

        Ok(Self {
            decoder,
            ready: VecDeque::new(),
            frames_decoded: 0,
        })
    }

    /// Get number of frames decoded.
    pub const fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

/// Copy the luma plane out of a picture the decoder still owns.
fn copy_luma(yuv: &DecodedYUV<'_>) -> Result<DecodedImage, String> {
    let (width, height) = yuv.dimensions();
    let (y_stride, _, _) = yuv.strides();
    Ok(DecodedImage {
        width: u32::try_from(width).map_err(|_| format!("width {width} out of range"))?,
        height: u32::try_from(height).map_err(|_| format!("height {height} out of range"))?,
        stride: y_stride,
        plane: yuv.y().to_vec(),
    })
}

impl VideoDecoder for OpenH264Decoder {
    fn submit(&mut self, unit: &[u8]) -> Result<(), String> {
        trace!("Decoding NAL unit: {} bytes", unit.len());

        let Some(yuv) = self.decoder.decode(unit).map_err(|e| format!("{e:?}"))? else {
            // Need more data
            return Ok(());
        };

        let image = copy_luma(&yuv)?;
        self.frames_decoded += 1;
        self.ready.push_back(image);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), String> {
        let remaining = self
            .decoder
            .flush_remaining()
            .map_err(|e| format!("{e:?}"))?;
        debug!("Flushed {} buffered pictures", remaining.len());

        for yuv in &remaining {
            let image = copy_luma(yuv)?;
            self.frames_decoded += 1;
            self.ready.push_back(image);
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<DecodedImage> {
        self.ready.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_new() {
        let decoder = OpenH264Decoder::new().expect("decoder should initialize");
        assert_eq!(decoder.frames_decoded(), 0);
    }

    #[test]
    fn test_parameter_sets_alone_yield_no_image() {
        let mut decoder = OpenH264Decoder::new().expect("decoder should initialize");

        // Baseline SPS for 16x16 and its PPS.
        let sps = [0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x0A, 0xDA, 0x0F, 0x88, 0x8C, 0x04, 0x40];
        let pps = [0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80];
        assert!(decoder.submit(&sps).is_ok(), "SPS should be accepted");
        assert!(decoder.submit(&pps).is_ok(), "PPS should be accepted");

        assert!(decoder.poll().is_none());
    }

    #[test]
    fn test_flush_without_pictures_is_empty() {
        let mut decoder = OpenH264Decoder::new().expect("decoder should initialize");

        assert!(decoder.flush().is_ok());
        assert!(decoder.poll().is_none());
        assert_eq!(decoder.frames_decoded(), 0);
    }
}
