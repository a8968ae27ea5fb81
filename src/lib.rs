//! UVC-Capture: V4L2 capture sessions for USB video class cameras
//!
//! A [`Session`] opens a device node, negotiates format and frame interval,
//! maps a ring of kernel-owned buffers and hands out zero-copy views of
//! captured frames. Device controls (brightness, exposure, ...) are exposed
//! by symbolic name through a registry built from the driver's enumeration.
//!
//! The driver is reached through the [`CameraDevice`] trait, so the session
//! logic runs the same against real hardware and against the test mock.

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod frame;
pub mod ring;
pub mod session;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::CaptureConfig;
pub use control::{ControlDescriptor, ControlRegistry};
pub use device::{V4L2Device, V4l2Backend};
pub use error::{CameraError, Result};
pub use frame::{Frame, FrameMetadata};
pub use ring::{BufferRing, BufferSlot, Ownership};
pub use session::{Session, SessionState};
pub use traits::{
    Backend, CameraDevice, ControlInfo, ControlKind, DequeuedBuffer, DeviceCapabilities, Format,
    FourCC, FrameInterval,
};

/// Open a V4L2 device with `config` and start streaming.
///
/// Frames can be acquired from the returned session right away.
pub fn open(config: &CaptureConfig) -> Result<Session> {
    Session::open_streaming(config)
}
