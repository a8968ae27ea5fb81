//! V4L2 device implementation using the v4l crate.

use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;

use tracing::debug;
use v4l::buffer::Type;
use v4l::control::{
    Control, Description, Flags as ControlFlags, MenuItem, Type as ControlType, Value,
};
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as _, Stream as _};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Fraction};

use crate::traits::{
    Backend, CameraDevice, ControlInfo, ControlKind, DequeuedBuffer, DeviceCapabilities, Format,
    FourCC, FrameInterval,
};

/// Opens V4L2 device nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl Backend for V4l2Backend {
    type Device = V4L2Device;

    fn open(&self, path: &Path) -> io::Result<V4L2Device> {
        V4L2Device::open(path)
    }
}

/// V4L2 device implementation wrapping the v4l crate.
///
/// Buffers are mapped through the crate's mmap stream; the stream is
/// dropped (unmapping every buffer) before the device handle.
pub struct V4L2Device {
    stream: Option<Stream<'static>>,
    device: Device,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open a V4L2 device node such as `/dev/video0`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::with_path(path)?;
        let caps = device.query_caps()?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };
        debug!(path = %path.display(), card = %capabilities.card, "device opened");

        Ok(Self {
            stream: None,
            device,
            capabilities,
        })
    }

    fn stream_mut(&mut self) -> io::Result<&mut Stream<'static>> {
        self.stream.as_mut().ok_or_else(no_buffers)
    }
}

impl CameraDevice for V4L2Device {
    fn descriptor(&self) -> RawFd {
        self.device.handle().fd()
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let mut fmt = self.device.format()?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self.device.set_format(&fmt)?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_interval(&mut self, interval: FrameInterval) -> io::Result<FrameInterval> {
        let requested = Parameters::new(Fraction::new(interval.numerator, interval.denominator));
        let params = self.device.set_params(&requested)?;
        Ok(FrameInterval::new(
            params.interval.numerator,
            params.interval.denominator,
        ))
    }

    fn query_controls(&self) -> io::Result<Vec<ControlInfo>> {
        Ok(self
            .device
            .query_controls()?
            .into_iter()
            .map(control_info)
            .collect())
    }

    fn control(&self, control: &ControlInfo) -> io::Result<i64> {
        match self.device.control(control.id)?.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("control {:#x} has non-integer value {other:?}", control.id),
            )),
        }
    }

    fn set_control(&mut self, control: &ControlInfo, value: i64) -> io::Result<()> {
        let value = match control.kind {
            ControlKind::Boolean => Value::Boolean(value != 0),
            ControlKind::Button => Value::None,
            _ => Value::Integer(value),
        };
        self.device.set_control(Control {
            id: control.id,
            value,
        })
    }

    fn map_buffers(&mut self, count: u32) -> io::Result<Vec<usize>> {
        if self.stream.is_some() {
            return Err(io::Error::other("buffers are already mapped"));
        }
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, count)?;
        let capacities = (0..)
            .map_while(|index| stream.get(index).map(<[u8]>::len))
            .collect();
        self.stream = Some(stream);
        Ok(capacities)
    }

    fn unmap_buffers(&mut self) -> io::Result<()> {
        // Dropping the stream unmaps the buffers and releases them with the driver.
        self.stream = None;
        Ok(())
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.stream.as_ref()?.get(index)
    }

    fn queue(&mut self, index: usize) -> io::Result<()> {
        self.stream_mut()?.queue(index)
    }

    fn dequeue(&mut self) -> io::Result<DequeuedBuffer> {
        let stream = self.stream_mut()?;
        let index = stream.dequeue()?;
        let meta = stream.get_meta(index).ok_or_else(no_buffers)?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        Ok(DequeuedBuffer {
            index,
            bytes_used: meta.bytesused,
            sequence: meta.sequence,
            timestamp: Duration::new(secs, nanos),
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_mut()?.start()
    }

    fn stream_off(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.stop(),
            None => Ok(()),
        }
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        Ok(self.device.handle().poll(libc::POLLIN, poll_timeout(timeout))? > 0)
    }

    fn close(self) -> io::Result<()> {
        let Self { stream, device, .. } = self;
        drop(stream);
        // The handle closes its descriptor when the last reference drops.
        drop(device);
        Ok(())
    }
}

fn control_info(desc: Description) -> ControlInfo {
    let kind = match desc.typ {
        ControlType::Integer | ControlType::Integer64 => ControlKind::Integer,
        ControlType::Boolean => ControlKind::Boolean,
        ControlType::Menu => ControlKind::Menu,
        ControlType::IntegerMenu => ControlKind::IntegerMenu,
        ControlType::Button => ControlKind::Button,
        ControlType::CtrlClass => ControlKind::Class,
        // U8/U16/U32 are compound array payloads, not scalar values.
        _ => ControlKind::Other,
    };
    let menu = desc
        .items
        .unwrap_or_default()
        .into_iter()
        .map(|(index, item)| {
            let label = match item {
                MenuItem::Name(name) => name,
                MenuItem::Value(value) => value.to_string(),
            };
            (index, label)
        })
        .collect();

    ControlInfo {
        id: desc.id,
        label: desc.name,
        kind,
        minimum: desc.minimum,
        maximum: desc.maximum,
        step: desc.step,
        default: desc.default,
        menu,
        read_only: desc.flags.contains(ControlFlags::READ_ONLY),
        disabled: desc.flags.contains(ControlFlags::DISABLED),
    }
}

/// `poll(2)` timeout in milliseconds; `None` waits forever. Sub-millisecond
/// remainders round up so a short timeout never becomes a non-blocking poll.
fn poll_timeout(timeout: Option<Duration>) -> i32 {
    timeout.map_or(-1, |timeout| {
        i32::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(i32::MAX)
    })
}

fn no_buffers() -> io::Error {
    io::Error::other("no buffers mapped")
}
