//! Frame acquisition: readiness wait, dequeue, zero-copy view.

use std::time::Duration;

use tracing::trace;

use crate::error::{CameraError, Result};
use crate::ring::{BufferRing, RingError};
use crate::traits::CameraDevice;

/// Metadata for a captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Buffer slot the frame was captured into.
    pub index: usize,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
    /// Allocated size of the buffer slot.
    pub capacity: usize,
}

/// A captured video frame, borrowed from the session's mapped buffer.
///
/// The data stays valid until the next acquisition, `stop`, `close` or
/// `reconfigure` on the same session; the borrow checker enforces this since
/// all of those take the session mutably.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    /// Raw frame data, exactly `bytes_used` long.
    pub data: &'a [u8],
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame<'_> {
    /// Length of the captured data.
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the driver delivered an empty frame.
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Wait for and dequeue one filled buffer.
///
/// The slot handed out by the previous call is re-queued first. A zero
/// `timeout` blocks until the device is readable. On expiry no slot is
/// consumed.
pub(crate) fn acquire<'a, D: CameraDevice>(
    device: &'a mut D,
    ring: &mut BufferRing,
    timeout: Duration,
) -> Result<Frame<'a>> {
    ring.requeue_held(device).map_err(grab_error)?;

    let wait = (!timeout.is_zero()).then_some(timeout);
    let ready = device
        .wait_readable(wait)
        .map_err(CameraError::FrameGrabFailed)?;
    if !ready {
        trace!(?timeout, "no frame before deadline");
        return Err(CameraError::Timeout);
    }

    let buffer = ring.dequeue(device).map_err(grab_error)?;
    let bytes_used = ring.slot(buffer.index).map_or(0, |slot| slot.bytes_used);
    let capacity = ring.slot(buffer.index).map_or(0, |slot| slot.capacity);

    let device: &'a D = device;
    let data = device
        .buffer(buffer.index)
        .and_then(|mapped| mapped.get(..bytes_used))
        .ok_or(CameraError::BufferStateCorrupt {
            index: buffer.index,
            found: None,
            operation: "read",
        })?;

    Ok(Frame {
        data,
        metadata: FrameMetadata {
            index: buffer.index,
            sequence: buffer.sequence,
            timestamp: buffer.timestamp,
            bytes_used: buffer.bytes_used,
            capacity,
        },
    })
}

fn grab_error(err: RingError) -> CameraError {
    match err {
        RingError::Driver(source) => CameraError::FrameGrabFailed(source),
        RingError::Corrupt(err) => err,
    }
}
