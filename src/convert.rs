//! Pixel conversion between packed 4:2:2 luma/chroma and RGB.
//!
//! All functions are pure. Output buffers are owned by the caller and passed
//! in, so a capture loop can reuse one allocation across frames.
//!
//! Arithmetic is done in `f32`; every channel is clamped to `[0, 255]` and
//! then truncated toward zero. For the pixel pair `[(100, 130), (150, 110)]`
//! this yields `(79, 109, 104)` and `(129, 159, 154)`.

use crate::error::{CaptureError, Result};
use crate::traits::{Frame, PixelFormat};

/// One RGB pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Rgb {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

impl Rgb {
    /// Create a pixel.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// One packed 4:2:2 sample: a luma value and this pixel's chroma byte.
///
/// Even pixels carry the blue-difference chroma, odd pixels the
/// red-difference chroma of the pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Yuyv {
    /// Luma.
    pub y: u8,
    /// Chroma shared with the horizontal neighbour.
    pub uv: u8,
}

impl Yuyv {
    /// Create a sample.
    pub const fn new(y: u8, uv: u8) -> Self {
        Self { y, uv }
    }

    /// Split raw `[Y0 U Y1 V]` bytes into samples. A trailing odd byte is ignored.
    pub fn from_packed(bytes: &[u8]) -> impl Iterator<Item = Self> + '_ {
        bytes
            .chunks_exact(2)
            .map(|pair| match *pair {
                [y, uv] => Self::new(y, uv),
                _ => Self::default(),
            })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn saturate(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// Convert one pixel given its luma and the pair's two chroma bytes.
///
/// `cb` is the chroma byte carried by the even pixel, `cr` the one carried
/// by the odd pixel.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuyv_pixel(y: u8, cb: u8, cr: u8) -> Rgb {
    let y = f32::from(y);
    let v = f32::from(cb) - 128.0;
    let u = f32::from(cr) - 128.0;

    let r = 1.14f32.mul_add(u, y);
    let g = 0.581f32.mul_add(-u, 0.395f32.mul_add(-v, y));
    let b = 2.033f32.mul_add(v, y);

    Rgb::new(saturate(r), saturate(g), saturate(b))
}

fn convert_row(src: &[Yuyv], dst: &mut [Rgb]) {
    for (x, (own, out)) in src.iter().zip(dst.iter_mut()).enumerate() {
        *out = if x % 2 == 0 {
            // A trailing even pixel has no partner and reuses its own chroma.
            let cr = src.get(x + 1).map_or(own.uv, |next| next.uv);
            yuyv_pixel(own.y, own.uv, cr)
        } else {
            let cb = x
                .checked_sub(1)
                .and_then(|prev| src.get(prev))
                .map_or(own.uv, |prev| prev.uv);
            yuyv_pixel(own.y, cb, own.uv)
        };
    }
}

fn check_plane(width: usize, src_len: usize, dst_len: usize) -> Result<()> {
    if width == 0 || src_len % width != 0 {
        return Err(CaptureError::BufferSizeMismatch {
            expected: src_len.next_multiple_of(width.max(1)),
            actual: src_len,
        });
    }
    if dst_len != src_len {
        return Err(CaptureError::BufferSizeMismatch {
            expected: src_len,
            actual: dst_len,
        });
    }
    Ok(())
}

/// Convert a packed 4:2:2 plane of `width`-pixel rows into `dst`.
pub fn yuyv_to_rgb_into(width: usize, src: &[Yuyv], dst: &mut [Rgb]) -> Result<()> {
    check_plane(width, src.len(), dst.len())?;

    for (src_row, dst_row) in src.chunks_exact(width).zip(dst.chunks_exact_mut(width)) {
        convert_row(src_row, dst_row);
    }
    Ok(())
}

/// Convert a packed 4:2:2 plane of `width`-pixel rows into a new RGB plane.
pub fn yuyv_to_rgb(width: usize, src: &[Yuyv]) -> Result<Vec<Rgb>> {
    let mut dst = vec![Rgb::default(); src.len()];
    yuyv_to_rgb_into(width, src, &mut dst)?;
    Ok(dst)
}

/// Convert a YUYV frame into `dst`, which must hold `width * height` pixels.
///
/// Row padding in the frame is skipped.
pub fn frame_to_rgb_into(frame: &Frame<'_>, dst: &mut [Rgb]) -> Result<()> {
    if frame.format != PixelFormat::Yuyv422 {
        return Err(CaptureError::InvalidRequest(format!(
            "cannot convert {:?} frame as YUYV",
            frame.format
        )));
    }

    let width = frame.width as usize;
    let expected = width * frame.height as usize;
    if dst.len() != expected {
        return Err(CaptureError::BufferSizeMismatch {
            expected,
            actual: dst.len(),
        });
    }
    if frame.stride < width * 2 {
        return Err(CaptureError::BufferSizeMismatch {
            expected: width * 2,
            actual: frame.stride,
        });
    }
    let needed = frame.stride * frame.height as usize;
    if frame.data.len() < needed {
        return Err(CaptureError::BufferSizeMismatch {
            expected: needed,
            actual: frame.data.len(),
        });
    }

    let mut samples = Vec::with_capacity(width);
    for (row, dst_row) in frame.rows().zip(dst.chunks_exact_mut(width.max(1))) {
        samples.clear();
        samples.extend(Yuyv::from_packed(row).take(width));
        convert_row(&samples, dst_row);
    }
    Ok(())
}

fn bias_channel(value: u8, bias: i32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let out = i32::from(value).saturating_add(bias).clamp(0, 255) as u8;
    out
}

/// Add `bias` to every channel of `src`, saturating, writing into `dst`.
pub fn apply_brightness_bias_into(src: &[Rgb], bias: i32, dst: &mut [Rgb]) -> Result<()> {
    if src.len() != dst.len() {
        return Err(CaptureError::BufferSizeMismatch {
            expected: src.len(),
            actual: dst.len(),
        });
    }

    for (out, px) in dst.iter_mut().zip(src) {
        *out = Rgb::new(
            bias_channel(px.r, bias),
            bias_channel(px.g, bias),
            bias_channel(px.b, bias),
        );
    }
    Ok(())
}

/// Add `bias` to every channel of `src`, saturating.
#[must_use]
pub fn apply_brightness_bias(src: &[Rgb], bias: i32) -> Vec<Rgb> {
    src.iter()
        .map(|px| {
            Rgb::new(
                bias_channel(px.r, bias),
                bias_channel(px.g, bias),
                bias_channel(px.b, bias),
            )
        })
        .collect()
}

/// Flatten an RGB plane into `R G B` bytes.
#[must_use]
pub fn rgb_bytes(pixels: &[Rgb]) -> Vec<u8> {
    pixels.iter().flat_map(|px| [px.r, px.g, px.b]).collect()
}
