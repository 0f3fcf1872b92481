//! Error type shared by every capture backend.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::traits::{Format, SessionState};

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors raised while opening, configuring or reading from a capture source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The request carries a zero width, height or frame rate.
    #[error("invalid capture request: {0}")]
    InvalidRequest(String),

    /// The source path could not be opened.
    #[error("failed to open {path}: {source}")]
    OpenFailed {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Neither a video-capture device nor a decodable bitstream.
    #[error("{0} offers no video capture capability")]
    NoCaptureCapability(String),

    /// The driver refused the requested pixel format or geometry.
    #[error("format rejected: {format:?}")]
    FormatRejected {
        /// Format that was requested.
        format: Format,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The driver refused the requested frame interval.
    #[error("frame rate of {fps} fps rejected")]
    RateRejected {
        /// Requested frames per second.
        fps: u32,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The buffer request ioctl failed outright.
    #[error("buffer request failed: {0}")]
    BufferRequestFailed(#[source] io::Error),

    /// Fewer buffers than the protocol minimum were requested or granted.
    #[error("insufficient buffers: requested {requested}, granted {granted}")]
    BufferCountInsufficient {
        /// Buffers requested.
        requested: u32,
        /// Buffers granted by the device.
        granted: u32,
    },

    /// The device could not describe one of its buffers.
    #[error("query of buffer {index} failed: {source}")]
    QueryBufferFailed {
        /// Buffer index.
        index: u32,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A buffer could not be mapped into the process.
    #[error("mapping buffer {index} failed: {source}")]
    MapFailed {
        /// Buffer index.
        index: u32,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A buffer could not be handed back to the device.
    #[error("enqueue of buffer {index} failed: {source}")]
    EnqueueFailed {
        /// Buffer index.
        index: u32,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Waiting for a filled buffer failed.
    #[error("dequeue failed: {0}")]
    DequeueFailed(#[source] io::Error),

    /// Streaming could not be started. Fatal for the session.
    #[error("stream arm failed: {0}")]
    StreamArmFailed(#[source] io::Error),

    /// The decoder context could not be created.
    #[error("decoder init failed: {0}")]
    DecoderInitFailed(String),

    /// The bitstream could not be parsed or decoded. Fatal for the session.
    #[error("malformed bitstream: {0}")]
    MalformedBitstream(String),

    /// Reading raw bytes from the source failed.
    #[error("source read failed: {0}")]
    SourceRead(#[source] io::Error),

    /// The decoded stream has no more frames.
    #[error("end of stream")]
    EndOfStream,

    /// The operation is not valid in the session's current state.
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Source and destination planes disagree in size.
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// A frame did not contain the expected test pattern.
    #[error("pattern mismatch: {0}")]
    PatternMismatch(String),
}

impl CaptureError {
    /// Whether the session that produced this error must be reopened.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StreamArmFailed(_) | Self::MalformedBitstream(_))
    }
}
