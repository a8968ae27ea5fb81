//! Mock driver for testing without hardware.
//!
//! Devices opened from one [`MockBackend`] share a ledger counting open
//! handles and mapped buffers, so tests can check that every failure path
//! releases what it acquired. [`MockBehavior`] makes individual driver
//! requests fail.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    Backend, CameraDevice, ControlInfo, ControlKind, DequeuedBuffer, DeviceCapabilities, Format,
    FourCC, FrameInterval,
};

/// `V4L2_CID_BRIGHTNESS`.
pub const CID_BRIGHTNESS: u32 = 0x0098_0900;

/// Resources currently held and calls made against a mock backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockLedger {
    /// Handles opened and not yet released.
    pub open_handles: usize,
    /// Buffers mapped and not yet unmapped.
    pub mapped_buffers: usize,
    /// Successful opens.
    pub opens: usize,
    /// Explicit closes.
    pub closes: usize,
    /// Handles released by dropping the device instead of closing it.
    pub implicit_releases: usize,
    /// Control writes that reached the driver.
    pub control_writes: usize,
    /// Successful stream-on requests.
    pub stream_ons: usize,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Horizontal gradient from dark to light within each line.
    Gradient,
    /// Every byte set to the same value.
    Solid(u8),
}

/// Knobs controlling how the mock driver responds.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Opening the device node fails.
    pub fail_open: bool,
    /// Format negotiation is rejected.
    pub reject_format: bool,
    /// Frame interval requests are rejected.
    pub reject_interval: bool,
    /// Buffer mapping fails.
    pub fail_map: bool,
    /// Grant at most this many buffers.
    pub buffer_limit: Option<u32>,
    /// Stream-on fails.
    pub fail_stream_on: bool,
    /// Stream-off reports an error (streaming still stops).
    pub fail_stream_off: bool,
    /// Closing the handle reports an error (the handle is still released).
    pub fail_close: bool,
    /// The device never becomes readable.
    pub never_ready: bool,
    /// Next dequeue reports this index regardless of the driver queue.
    pub spurious_dequeue: Option<usize>,
    /// Largest width the driver accepts.
    pub max_width: u32,
    /// Largest height the driver accepts.
    pub max_height: u32,
    /// Pattern written into filled buffers.
    pub pattern: TestPattern,
    /// Controls the device enumerates.
    pub controls: Vec<ControlInfo>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_open: false,
            reject_format: false,
            reject_interval: false,
            fail_map: false,
            buffer_limit: None,
            fail_stream_on: false,
            fail_stream_off: false,
            fail_close: false,
            never_ready: false,
            spurious_dequeue: None,
            max_width: 1920,
            max_height: 1080,
            pattern: TestPattern::Gradient,
            controls: default_controls(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    ledger: MockLedger,
    behavior: MockBehavior,
}

/// Opens mock devices sharing one ledger.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    shared: Rc<RefCell<Shared>>,
}

impl MockBackend {
    /// Create a backend with default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the behavior.
    #[must_use]
    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        self.shared.borrow_mut().behavior = behavior;
        self
    }

    /// Change the behavior of this backend and every device it opened.
    pub fn update<F: FnOnce(&mut MockBehavior)>(&self, change: F) {
        change(&mut self.shared.borrow_mut().behavior);
    }

    /// Snapshot of the resource ledger.
    pub fn ledger(&self) -> MockLedger {
        self.shared.borrow().ledger.clone()
    }
}

impl Backend for MockBackend {
    type Device = MockDevice;

    fn open(&self, _path: &Path) -> io::Result<MockDevice> {
        let mut shared = self.shared.borrow_mut();
        if shared.behavior.fail_open {
            return Err(errno(libc::ENOENT));
        }
        shared.ledger.opens += 1;
        shared.ledger.open_handles += 1;
        let fd = 100 + RawFd::try_from(shared.ledger.opens).unwrap_or(0);
        let controls = shared.behavior.controls.clone();
        let values = controls.iter().map(|c| (c.id, c.default)).collect();

        Ok(MockDevice {
            shared: Rc::clone(&self.shared),
            fd,
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            interval: FrameInterval::new(1, 30),
            controls,
            values,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
            closed: false,
        })
    }
}

/// Mock device for testing without hardware.
#[derive(Debug)]
pub struct MockDevice {
    shared: Rc<RefCell<Shared>>,
    fd: RawFd,
    capabilities: DeviceCapabilities,
    format: Format,
    interval: FrameInterval,
    controls: Vec<ControlInfo>,
    values: HashMap<u32, i64>,
    buffers: Vec<Vec<u8>>,
    queued: VecDeque<usize>,
    streaming: bool,
    sequence: u32,
    closed: bool,
}

impl MockDevice {
    fn behavior(&self) -> MockBehavior {
        self.shared.borrow().behavior.clone()
    }

    fn control_info(&self, id: u32) -> io::Result<&ControlInfo> {
        self.controls
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| errno(libc::EINVAL))
    }

    fn release(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.ledger.mapped_buffers -= self.buffers.len();
        shared.ledger.open_handles -= 1;
        self.buffers.clear();
        self.queued.clear();
        self.streaming = false;
        self.closed = true;
    }

    /// Bytes a filled buffer carries for the current format.
    fn payload_len(&self, capacity: usize) -> usize {
        if self.format.fourcc.is_compressed() {
            (capacity / 4).max(1)
        } else {
            capacity
        }
    }
}

impl CameraDevice for MockDevice {
    fn descriptor(&self) -> RawFd {
        self.fd
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let behavior = self.behavior();
        if behavior.reject_format {
            return Err(errno(libc::EINVAL));
        }
        if !self.buffers.is_empty() {
            return Err(errno(libc::EBUSY));
        }
        let width = format.width.clamp(16, behavior.max_width) & !1;
        let height = format.height.clamp(16, behavior.max_height);
        let fourcc = match format.fourcc {
            FourCC::YUYV | FourCC::MJPG | FourCC::RGB3 | FourCC::GREY => format.fourcc,
            _ => FourCC::YUYV,
        };
        self.format = Format::new(width, height, fourcc);
        Ok(self.format.clone())
    }

    fn set_interval(&mut self, interval: FrameInterval) -> io::Result<FrameInterval> {
        if self.behavior().reject_interval {
            return Err(errno(libc::ENOTTY));
        }
        self.interval = interval;
        Ok(interval)
    }

    fn query_controls(&self) -> io::Result<Vec<ControlInfo>> {
        Ok(self.controls.clone())
    }

    fn control(&self, control: &ControlInfo) -> io::Result<i64> {
        let info = self.control_info(control.id)?;
        if info.kind == ControlKind::Button {
            return Err(errno(libc::EACCES));
        }
        self.values
            .get(&control.id)
            .copied()
            .ok_or_else(|| errno(libc::EINVAL))
    }

    fn set_control(&mut self, control: &ControlInfo, value: i64) -> io::Result<()> {
        let info = self.control_info(control.id)?.clone();
        if info.read_only {
            return Err(errno(libc::EACCES));
        }
        if value < info.minimum || value > info.maximum {
            return Err(errno(libc::ERANGE));
        }
        let step = i64::try_from(info.step.max(1)).unwrap_or(1);
        let rounded = info.minimum + (value - info.minimum + step / 2) / step * step;
        self.values.insert(info.id, rounded.min(info.maximum));
        self.shared.borrow_mut().ledger.control_writes += 1;
        Ok(())
    }

    fn map_buffers(&mut self, count: u32) -> io::Result<Vec<usize>> {
        let behavior = self.behavior();
        if behavior.fail_map {
            return Err(errno(libc::ENOMEM));
        }
        if !self.buffers.is_empty() {
            return Err(errno(libc::EBUSY));
        }
        let granted = behavior.buffer_limit.map_or(count, |limit| count.min(limit));
        let capacity = usize::try_from(self.format.size).unwrap_or(0);
        self.buffers = (0..granted).map(|_| vec![0; capacity]).collect();
        self.shared.borrow_mut().ledger.mapped_buffers += self.buffers.len();
        Ok(self.buffers.iter().map(Vec::len).collect())
    }

    fn unmap_buffers(&mut self) -> io::Result<()> {
        if self.streaming {
            return Err(errno(libc::EBUSY));
        }
        self.shared.borrow_mut().ledger.mapped_buffers -= self.buffers.len();
        self.buffers.clear();
        self.queued.clear();
        Ok(())
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(index).map(Vec::as_slice)
    }

    fn queue(&mut self, index: usize) -> io::Result<()> {
        if index >= self.buffers.len() || self.queued.contains(&index) {
            return Err(errno(libc::EINVAL));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<DequeuedBuffer> {
        let spurious = self.shared.borrow_mut().behavior.spurious_dequeue.take();
        let index = match spurious {
            Some(index) => index,
            None if !self.streaming => return Err(errno(libc::EINVAL)),
            None => self.queued.pop_front().ok_or_else(|| errno(libc::EAGAIN))?,
        };

        let pattern = self.behavior().pattern;
        let stride = usize::try_from(self.format.stride).unwrap_or(1);
        let sequence = self.sequence;
        let capacity = self.buffers.get(index).map_or(0, Vec::len);
        let payload = self.payload_len(capacity);
        if let Some(buffer) = self.buffers.get_mut(index) {
            fill_frame(buffer, stride, pattern, sequence);
        }
        self.sequence += 1;

        Ok(DequeuedBuffer {
            index,
            bytes_used: u32::try_from(payload).unwrap_or(u32::MAX),
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.behavior().fail_stream_on {
            return Err(errno(libc::EIO));
        }
        if self.buffers.is_empty() {
            return Err(errno(libc::EINVAL));
        }
        self.streaming = true;
        self.shared.borrow_mut().ledger.stream_ons += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.streaming = false;
        self.queued.clear();
        if self.behavior().fail_stream_off {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let behavior = self.behavior();
        if behavior.spurious_dequeue.is_some() {
            return Ok(true);
        }
        if behavior.never_ready {
            if let Some(timeout) = timeout {
                std::thread::sleep(timeout);
            }
            return Ok(false);
        }
        Ok(self.streaming && !self.queued.is_empty())
    }

    fn close(mut self) -> io::Result<()> {
        self.release();
        self.shared.borrow_mut().ledger.closes += 1;
        if self.behavior().fail_close {
            return Err(errno(libc::EIO));
        }
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if !self.closed {
            self.release();
            self.shared.borrow_mut().ledger.implicit_releases += 1;
        }
    }
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Write the pattern into a frame buffer and stamp the sequence number
/// into the first four bytes.
fn fill_frame(data: &mut [u8], stride: usize, pattern: TestPattern, sequence: u32) {
    let stride = stride.max(1);
    for (offset, byte) in data.iter_mut().enumerate() {
        *byte = match pattern {
            #[allow(clippy::cast_possible_truncation)]
            TestPattern::Gradient => ((offset % stride) * 255 / stride) as u8,
            TestPattern::Solid(value) => value,
        };
    }
    for (byte, stamp) in data.iter_mut().zip(sequence.to_le_bytes()) {
        *byte = stamp;
    }
}

/// Controls of a typical UVC webcam.
pub fn default_controls() -> Vec<ControlInfo> {
    let integer = |id, label: &str, minimum, maximum, step, default| ControlInfo {
        id,
        label: label.to_owned(),
        kind: ControlKind::Integer,
        minimum,
        maximum,
        step,
        default,
        menu: Vec::new(),
        read_only: false,
        disabled: false,
    };
    let boolean = |id, label: &str, default| ControlInfo {
        kind: ControlKind::Boolean,
        ..integer(id, label, 0, 1, 1, default)
    };

    vec![
        ControlInfo {
            kind: ControlKind::Class,
            ..integer(0x0098_0001, "User Controls", 0, 0, 0, 0)
        },
        integer(CID_BRIGHTNESS, "Brightness", -64, 64, 1, 0),
        integer(0x0098_0901, "Contrast", 0, 95, 1, 32),
        integer(0x0098_0902, "Saturation", 0, 100, 1, 64),
        boolean(0x0098_090c, "White Balance Temperature, Auto", 1),
        ControlInfo {
            kind: ControlKind::Menu,
            menu: vec![
                (0, "Disabled".to_owned()),
                (1, "50 Hz".to_owned()),
                (2, "60 Hz".to_owned()),
            ],
            ..integer(0x0098_0918, "Power Line Frequency", 0, 2, 1, 1)
        },
        integer(0x009a_0902, "Exposure (Absolute)", 10, 2500, 10, 150),
        ControlInfo {
            disabled: true,
            ..boolean(0x009a_0910, "Privacy", 0)
        },
        ControlInfo {
            read_only: true,
            ..integer(0x0098_1000, "Frame Counter", 0, i64::from(i32::MAX), 1, 0)
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(backend: &MockBackend) -> MockDevice {
        backend.open(Path::new("/dev/video0")).expect("open should succeed")
    }

    #[test]
    fn test_mock_device_creation() {
        let backend = MockBackend::new();
        let device = open(&backend);
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
        assert_eq!(backend.ledger().open_handles, 1);
    }

    #[test]
    fn test_mock_device_adjusts_format() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let actual = device
            .set_format(&Format::new(4000, 3000, FourCC::new(b"H264")))
            .expect("set_format should succeed");
        assert_eq!((actual.width, actual.height), (1920, 1080));
        assert_eq!(actual.fourcc, FourCC::YUYV);
    }

    #[test]
    fn test_mock_close_and_drop_release_handles() {
        let backend = MockBackend::new();
        open(&backend).close().expect("close should succeed");
        drop(open(&backend));
        let ledger = backend.ledger();
        assert_eq!(ledger.open_handles, 0);
        assert_eq!(ledger.closes, 1);
        assert_eq!(ledger.implicit_releases, 1);
    }

    #[test]
    fn test_mock_stream_capture() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        device
            .set_format(&Format::new(64, 48, FourCC::YUYV))
            .expect("format");
        device.map_buffers(2).expect("map");
        device.queue(0).expect("queue");
        device.queue(1).expect("queue");
        assert!(device.queue(1).is_err());
        device.stream_on().expect("stream on");
        assert!(device.wait_readable(None).expect("poll"));

        let first = device.dequeue().expect("dequeue");
        let second = device.dequeue().expect("dequeue");
        assert_eq!((first.index, first.sequence), (0, 0));
        assert_eq!((second.index, second.sequence), (1, 1));
        assert!(!device.wait_readable(None).expect("poll"));
        assert_eq!(
            device.dequeue().map_err(|e| e.kind()).err(),
            Some(io::ErrorKind::WouldBlock)
        );
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = vec![0u8; 128 * 2];
        fill_frame(&mut data, 128, TestPattern::Gradient, 0);
        // Left edge should be dark, right edge bright
        assert!(data[4] < 10);
        assert!(data[127] > 240);
        assert!(data[128 + 4] < 10);
    }

    #[test]
    fn test_solid_pattern_with_sequence_stamp() {
        let mut data = vec![0u8; 16];
        fill_frame(&mut data, 8, TestPattern::Solid(128), 0x0102_0304);
        assert_eq!(&data[..4], &[4, 3, 2, 1]);
        assert!(data[4..].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_unmap_while_streaming_is_busy() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        device.map_buffers(1).expect("map");
        device.stream_on().expect("stream on");
        assert_eq!(
            device.unmap_buffers().map_err(|e| e.raw_os_error()).err(),
            Some(Some(libc::EBUSY))
        );
        device.stream_off().expect("stream off");
        device.unmap_buffers().expect("unmap");
        assert_eq!(backend.ledger().mapped_buffers, 0);
    }
}
