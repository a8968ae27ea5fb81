//! Core traits and types for the V4L2 driver seam.
//!
//! [`CameraDevice`] is the ioctl-level surface a session drives. The V4L2
//! implementation lives in [`crate::device`]; tests use an in-process mock.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CameraError;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// NV12 (4:2:0, interleaved chroma plane).
    pub const NV12: Self = Self::new(b"NV12");
    /// YU12 (4:2:0 planar, also known as I420).
    pub const YU12: Self = Self::new(b"YU12");

    /// Resolve a pixel format name such as `"yuyv"` or `"mjpeg"`.
    ///
    /// Known names are matched case-insensitively. Anything else must be a
    /// literal four-character code and is taken byte for byte.
    pub fn from_name(name: &str) -> Option<Self> {
        let known = match name.to_ascii_lowercase().as_str() {
            "yuyv" | "yuy2" => Some(Self::YUYV),
            "mjpeg" | "mjpg" => Some(Self::MJPG),
            "rgb3" | "rgb24" => Some(Self::RGB3),
            "grey" | "gray" => Some(Self::GREY),
            "nv12" => Some(Self::NV12),
            "yu12" | "yuv420" | "i420" => Some(Self::YU12),
            _ => None,
        };
        known.or_else(|| {
            let bytes: [u8; 4] = name.as_bytes().try_into().ok()?;
            bytes.iter().all(u8::is_ascii_graphic).then_some(Self(bytes))
        })
    }

    /// Whether frames in this format are compressed (variable length).
    pub fn is_compressed(self) -> bool {
        self == Self::MJPG
    }
}

impl FromStr for FourCC {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| CameraError::UnsupportedPixelFormat(s.to_owned()))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification with packed stride and size.
    ///
    /// Compressed formats get a worst-case size of two bytes per pixel.
    /// Sizes saturate at `u32::MAX`; the driver adjusts oversized requests.
    #[must_use]
    pub fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let pixels = width.saturating_mul(height);
        let (stride, size) = match &fourcc.0 {
            b"RGB3" => (width.saturating_mul(3), pixels.saturating_mul(3)),
            b"GREY" => (width, pixels),
            b"NV12" | b"YU12" => (width, pixels.saturating_mul(3) / 2),
            _ => (width.saturating_mul(2), pixels.saturating_mul(2)),
        };
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.fourcc)
    }
}

/// Time per frame, e.g. `1/15` for 15 frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInterval {
    /// Numerator (seconds).
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl FrameInterval {
    /// Create a new frame interval.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second, if the interval is non-degenerate.
    pub fn fps(self) -> Option<f64> {
        (self.numerator != 0).then(|| f64::from(self.denominator) / f64::from(self.numerator))
    }
}

impl fmt::Display for FrameInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Value type of a device control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Signed integer within `minimum..=maximum`.
    Integer,
    /// On/off switch, read and written as 0 or 1.
    Boolean,
    /// Index into a list of named items.
    Menu,
    /// Index into a list of integer items.
    IntegerMenu,
    /// Write-only trigger.
    Button,
    /// Control class header, not a real control.
    Class,
    /// Anything the registry does not handle (strings, compound types).
    Other,
}

/// A control as enumerated by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    /// Driver control id (`V4L2_CID_*`).
    pub id: u32,
    /// Human-readable label reported by the driver, e.g. `"Brightness"`.
    pub label: String,
    /// Value type.
    pub kind: ControlKind,
    /// Smallest accepted value.
    pub minimum: i64,
    /// Largest accepted value.
    pub maximum: i64,
    /// Value granularity.
    pub step: u64,
    /// Driver default.
    pub default: i64,
    /// Menu items as `(index, label)`, empty for non-menu controls.
    pub menu: Vec<(u32, String)>,
    /// Control cannot be written.
    pub read_only: bool,
    /// Control is permanently disabled on this device.
    pub disabled: bool,
}

/// Driver bookkeeping for a buffer handed back by dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Slot index.
    pub index: usize,
    /// Bytes of valid data in the slot.
    pub bytes_used: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Abstraction over an open capture device.
///
/// Methods map one-to-one onto driver requests and report raw driver errors;
/// lifecycle rules and error classification live in the session.
pub trait CameraDevice {
    /// Readiness-waitable descriptor for event-loop integration.
    fn descriptor(&self) -> RawFd;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Request a frame interval. Returns the interval the driver applied.
    fn set_interval(&mut self, interval: FrameInterval) -> io::Result<FrameInterval>;

    /// Enumerate the controls the device supports.
    fn query_controls(&self) -> io::Result<Vec<ControlInfo>>;

    /// Read the current value of a control.
    fn control(&self, control: &ControlInfo) -> io::Result<i64>;

    /// Write a control value.
    fn set_control(&mut self, control: &ControlInfo, value: i64) -> io::Result<()>;

    /// Allocate and map `count` buffers. Returns the capacity of each
    /// granted buffer; the driver may grant fewer or more than requested.
    fn map_buffers(&mut self, count: u32) -> io::Result<Vec<usize>>;

    /// Unmap and free all buffers.
    fn unmap_buffers(&mut self) -> io::Result<()>;

    /// Mapped memory of a buffer slot.
    fn buffer(&self, index: usize) -> Option<&[u8]>;

    /// Hand a buffer to the driver's incoming queue.
    fn queue(&mut self, index: usize) -> io::Result<()>;

    /// Take a filled buffer from the driver's outgoing queue.
    fn dequeue(&mut self) -> io::Result<DequeuedBuffer>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming. All queued buffers are returned by the driver.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Wait until a filled buffer can be dequeued.
    ///
    /// `None` waits indefinitely. Returns `false` if the wait expired.
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Release the handle.
    fn close(self) -> io::Result<()>;
}

/// Opens capture devices by path.
pub trait Backend {
    /// Device type this backend produces.
    type Device: CameraDevice;

    /// Open the device node at `path`.
    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}
