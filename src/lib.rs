//! Vidi-Capture: V4L2 frame acquisition with a software-decoding fallback
//!
//! A [`DeviceSession`] opens a path and picks a backend: memory-mapped
//! streaming for V4L2 capture nodes, or OpenH264 decoding for raw Annex-B
//! bitstreams. Both deliver frames through the same request/wait handshake.
//! The [`convert`] module turns packed YUYV frames into RGB with an optional
//! brightness bias, writing into caller-owned buffers.
//!
//! Kernel and decoder access sit behind the [`CameraDevice`] and
//! [`VideoDecoder`] traits, so everything above them runs against mocks in
//! unit tests.

pub mod bitstream;
pub mod convert;
pub mod decoded;
pub mod decoder;
pub mod device;
pub mod direct;
pub mod error;
pub mod pool;
pub mod request;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use convert::{
    apply_brightness_bias, apply_brightness_bias_into, yuyv_to_rgb, yuyv_to_rgb_into, Rgb, Yuyv,
};
pub use device::V4L2Device;
pub use error::{CaptureError, Result};
pub use request::CaptureRequest;
pub use session::DeviceSession;
pub use traits::{
    Backend, CameraDevice, DeviceCapabilities, Format, FourCC, Frame, FrameMetadata, FrameSource,
    PixelFormat, SessionState, VideoDecoder,
};
