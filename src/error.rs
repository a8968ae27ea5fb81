//! Error type for camera sessions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ring::Ownership;
use crate::session::SessionState;

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The device node could not be opened.
    #[error("could not open device {}: {source}", path.display())]
    DeviceUnavailable {
        /// Device node that was requested.
        path: PathBuf,
        /// Underlying driver error.
        #[source]
        source: io::Error,
    },

    /// The driver rejected format negotiation or buffer mapping.
    #[error("negotiation failed: {reason}")]
    NegotiationFailed {
        /// What was being negotiated.
        reason: String,
        /// Underlying driver error, if the driver reported one.
        #[source]
        source: Option<io::Error>,
    },

    /// Queueing buffers or stream-on failed.
    #[error("stream start failed: {0}")]
    StreamStartFailed(#[source] io::Error),

    /// Stream-off failed. The session still left the streaming state.
    #[error("stream stop failed: {0}")]
    StreamStopFailed(#[source] io::Error),

    /// No frame became ready before the deadline.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// Waiting for or dequeueing a filled buffer failed.
    #[error("bad frame grab: {0}")]
    FrameGrabFailed(#[source] io::Error),

    /// The device does not expose a control with this name.
    #[error("unknown control `{0}`")]
    ControlNotFound(String),

    /// The value lies outside the range the driver advertises.
    #[error("value {value} out of range for control `{name}` ({minimum}..={maximum})")]
    ControlOutOfRange {
        /// Control name.
        name: String,
        /// Rejected value.
        value: i64,
        /// Advertised minimum.
        minimum: i64,
        /// Advertised maximum.
        maximum: i64,
    },

    /// The control is read-only and cannot be written.
    #[error("control `{0}` is read-only")]
    ControlReadOnly(String),

    /// The driver failed to read or write a control.
    #[error("control `{name}` failed: {source}")]
    ControlFailed {
        /// Control name.
        name: String,
        /// Underlying driver error.
        #[source]
        source: io::Error,
    },

    /// Driver and application disagree about who owns a buffer slot.
    #[error("buffer {index} in unexpected state {found:?} during {operation}")]
    BufferStateCorrupt {
        /// Slot index.
        index: usize,
        /// Ownership found when the transition was attempted.
        found: Option<Ownership>,
        /// Transition being attempted.
        operation: &'static str,
    },

    /// Releasing mappings or closing the handle failed.
    #[error("close failed: {0}")]
    CloseFailed(#[source] io::Error),

    /// Operation not allowed in the current lifecycle state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Capture configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pixel format name is neither known nor a four-character code.
    #[error("unsupported pixel format `{0}`")]
    UnsupportedPixelFormat(String),
}

impl CameraError {
    pub(crate) fn negotiation<S: Into<String>>(reason: S, source: io::Error) -> Self {
        Self::NegotiationFailed {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Whether the error is a deadline expiry rather than a device failure.
    ///
    /// Event loops polling with a timeout can skip these ticks.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
