//! vidi-capture binary: capture frames from a camera or an H.264 file.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vidi_capture::convert::{apply_brightness_bias_into, frame_to_rgb_into};
use vidi_capture::{CaptureError, CaptureRequest, DeviceSession, PixelFormat, Rgb};

/// Pixel formats selectable on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Rgb24,
    Yuyv,
    Grey,
}

impl From<FormatArg> for PixelFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Rgb24 => Self::Rgb24,
            FormatArg::Yuyv => Self::Yuyv422,
            FormatArg::Grey => Self::Luma8,
        }
    }
}

/// Capture frames from a V4L2 device or an Annex-B H.264 file.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Device node or bitstream file.
    #[arg(default_value = "/dev/video0")]
    path: PathBuf,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frames per second.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Pixel format to request from the device. RGB24 when omitted.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Buffers to request from the device.
    #[arg(long, default_value_t = 1)]
    buffers: u32,

    /// Stop after this many frames. Runs until end of stream when omitted.
    #[arg(long)]
    frames: Option<u64>,

    /// Brightness bias added to every RGB channel.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    brightness: i32,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(&Args::parse()) {
        error!(error = %err, "capture failed");
        std::process::exit(1);
    }
}

fn capture_request(args: &Args) -> CaptureRequest {
    let request = CaptureRequest::new(&args.path)
        .with_geometry(args.width, args.height)
        .with_frame_rate(args.fps)
        .with_buffer_count(args.buffers);
    match args.format {
        Some(format) => request.with_pixel_format(format.into()),
        None => request,
    }
}

fn run(args: &Args) -> vidi_capture::Result<()> {
    let request = capture_request(args);

    let mut session = DeviceSession::open_and_probe(&request)?;
    info!(backend = ?session.backend(), path = %args.path.display(), "opened source");
    session.configure(&request)?;

    // Reused across frames; resized only when the geometry changes.
    let mut rgb: Vec<Rgb> = Vec::new();
    let mut biased: Vec<Rgb> = Vec::new();
    let mut captured = 0u64;

    while args.frames.map_or(true, |limit| captured < limit) {
        session.request_frame()?;
        let frame = match session.wait_frame() {
            Ok(frame) => frame,
            Err(CaptureError::EndOfStream) => {
                info!(frames = captured, "end of stream");
                break;
            }
            Err(err) => return Err(err),
        };

        let center = if frame.format == PixelFormat::Yuyv422 {
            let pixels = frame.width as usize * frame.height as usize;
            rgb.resize(pixels, Rgb::default());
            biased.resize(pixels, Rgb::default());
            frame_to_rgb_into(&frame, &mut rgb)?;
            apply_brightness_bias_into(&rgb, args.brightness, &mut biased)?;
            let width = frame.width as usize;
            biased.get((frame.height as usize / 2) * width + width / 2).copied()
        } else {
            frame.pixel_at(frame.width / 2, frame.height / 2)
        };

        info!(
            sequence = frame.metadata.sequence,
            timestamp = ?frame.metadata.timestamp,
            bytes = frame.data.len(),
            width = frame.width,
            height = frame.height,
            stride = frame.stride,
            center = ?center,
            "frame"
        );
        captured += 1;
    }

    session.close()
}
