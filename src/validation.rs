//! Frame validation utilities for test pattern verification.
//!
//! Used to check that captured frames contain known test patterns, both
//! against the mock device and against a `vivid` virtual camera.

use crate::convert::Rgb;
use crate::error::{CaptureError, Result};
use crate::traits::{Frame, FrameMetadata};

/// Expected RGB values for the 8 color bars after YUYV conversion.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const COLOR_BARS: [Rgb; 8] = [
    Rgb::new(235, 235, 235), // White
    Rgb::new(230, 243, 0),   // Yellow
    Rgb::new(42, 220, 247),  // Cyan
    Rgb::new(37, 228, 0),    // Green
    Rgb::new(213, 22, 255),  // Magenta
    Rgb::new(208, 30, 3),    // Red
    Rgb::new(20, 7, 255),    // Blue
    Rgb::new(16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for encoder and driver drift).
const COLOR_TOLERANCE: u8 = 15;

/// Validates that a frame contains the 8-bar color pattern.
///
/// Samples the center of each vertical bar on the middle row.
///
/// # Errors
///
/// Returns `PatternMismatch` if a sample falls outside the frame or any bar
/// differs from its expected color by more than the tolerance.
pub fn validate_color_bars(frame: &Frame<'_>) -> Result<()> {
    let bar_width = frame.width / 8;
    let center_y = frame.height / 2;

    for (bar_idx, expected) in (0u32..).zip(COLOR_BARS.iter()) {
        // Sample the center of each bar
        let sample_x = (bar_idx * bar_width) + (bar_width / 2);

        let actual = frame.pixel_at(sample_x, center_y).ok_or_else(|| {
            CaptureError::PatternMismatch(format!(
                "no pixel at ({sample_x}, {center_y})"
            ))
        })?;

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(CaptureError::PatternMismatch(format!(
                "color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                 expected {expected:?}, got {actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient, dark to light.
///
/// Luminance along the middle row must never drop by more than one step and
/// must rise by at least 50 overall.
///
/// # Errors
///
/// Returns `PatternMismatch` if the luminance is not monotonic or the frame
/// is close to a solid color.
pub fn validate_gradient(frame: &Frame<'_>) -> Result<()> {
    let center_y = frame.height / 2;

    // Sample every 10 pixels to check for monotonic increase
    let sample_step = 10;
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;

    for x in (0..frame.width).step_by(sample_step) {
        let Rgb { r, g, b } = frame.pixel_at(x, center_y).ok_or_else(|| {
            CaptureError::PatternMismatch(format!("no pixel at ({x}, {center_y})"))
        })?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                // Allow small decreases due to rounding
                return Err(CaptureError::PatternMismatch(format!(
                    "gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        first_luminance.get_or_insert(luminance);
        prev_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, prev_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CaptureError::PatternMismatch(format!(
                "insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Validates that frame sequence numbers increment by exactly 1.
///
/// # Errors
///
/// Returns `PatternMismatch` if `frames` is empty or has a gap.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<()> {
    if frames.is_empty() {
        return Err(CaptureError::PatternMismatch(
            "cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else { continue };
        let expected = prev.sequence.wrapping_add(1);

        if curr.sequence != expected {
            return Err(CaptureError::PatternMismatch(format!(
                "frame sequence gap at index {}: expected {expected}, got {}",
                i + 1,
                curr.sequence
            )));
        }
    }

    Ok(())
}

/// Whether every channel of `actual` is within `tolerance` of `expected`.
fn colors_match(actual: Rgb, expected: Rgb, tolerance: u8) -> bool {
    actual.r.abs_diff(expected.r) <= tolerance
        && actual.g.abs_diff(expected.g) <= tolerance
        && actual.b.abs_diff(expected.b) <= tolerance
}
