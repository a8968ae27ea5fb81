//! Capture session: one open device, its negotiated format, buffer ring and
//! control registry.
//!
//! Lifecycle: `Closed → Opened → Streaming → Opened → Closed`. Every
//! successful open is matched by exactly one close, either explicit or from
//! `Drop`. A session is driven from one thread at a time through `&mut self`.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::control::ControlRegistry;
use crate::device::{V4L2Device, V4l2Backend};
use crate::error::{CameraError, Result};
use crate::frame::{self, Frame};
use crate::ring::{BufferRing, RingError, RingResult};
use crate::traits::{Backend, CameraDevice, DeviceCapabilities, Format, FourCC, FrameInterval};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handle released; only `close` is accepted (as a no-op).
    Closed,
    /// Format negotiated and buffers mapped, not streaming.
    Opened,
    /// Buffers cycling between driver and application.
    Streaming,
}

/// An open capture device.
pub struct Session<D: CameraDevice = V4L2Device> {
    path: PathBuf,
    device: Option<D>,
    capabilities: DeviceCapabilities,
    format: Format,
    interval: FrameInterval,
    ring: BufferRing,
    controls: ControlRegistry,
    buffer_count: u32,
    state: SessionState,
}

/// Everything negotiation produces, applied to the session at once.
struct Negotiated {
    format: Format,
    interval: FrameInterval,
    controls: ControlRegistry,
    ring: BufferRing,
}

impl Session<V4L2Device> {
    /// Open a V4L2 device and negotiate the configured format.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        Self::open_with(&V4l2Backend, config)
    }

    /// Open a V4L2 device and start streaming.
    pub fn open_streaming(config: &CaptureConfig) -> Result<Self> {
        Self::open_streaming_with(&V4l2Backend, config)
    }
}

impl<D: CameraDevice> Session<D> {
    /// Open a device through `backend` and negotiate the configured format.
    ///
    /// The negotiated format, not the requested one, becomes session state.
    /// If anything fails after the device opened, mappings and handle are
    /// released before the error is returned.
    pub fn open_with<B: Backend<Device = D>>(backend: &B, config: &CaptureConfig) -> Result<Self> {
        config.validate()?;
        let mut device = backend
            .open(&config.path)
            .map_err(|source| CameraError::DeviceUnavailable {
                path: config.path.clone(),
                source,
            })?;

        let negotiated = match negotiate(
            &mut device,
            &config.format(),
            config.interval,
            config.buffer_count,
        ) {
            Ok(negotiated) => negotiated,
            Err(err) => {
                discard(device);
                return Err(err);
            }
        };

        info!(
            path = %config.path.display(),
            format = %negotiated.format,
            interval = %negotiated.interval,
            buffers = negotiated.ring.len(),
            controls = negotiated.controls.len(),
            "session opened"
        );

        Ok(Self {
            path: config.path.clone(),
            capabilities: device.capabilities().clone(),
            device: Some(device),
            format: negotiated.format,
            interval: negotiated.interval,
            ring: negotiated.ring,
            controls: negotiated.controls,
            buffer_count: config.buffer_count,
            state: SessionState::Opened,
        })
    }

    /// Open and start streaming. A failed start closes the session.
    pub fn open_streaming_with<B: Backend<Device = D>>(
        backend: &B,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let mut session = Self::open_with(backend, config)?;
        if let Err(err) = session.start() {
            if let Err(close_err) = session.close() {
                warn!(error = %close_err, "close after failed start");
            }
            return Err(err);
        }
        Ok(session)
    }

    /// Queue every buffer to the driver and turn streaming on.
    ///
    /// On failure the session stays `Opened` with no buffer queued.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Streaming => return Ok(()),
            SessionState::Closed => return Err(self.invalid("start")),
            SessionState::Opened => {}
        }
        let Some(device) = self.device.as_mut() else {
            return Err(self.invalid("start"));
        };

        if let Err(err) = queue_all_and_stream(device, &mut self.ring) {
            if let Err(off_err) = device.stream_off() {
                warn!(error = %off_err, "stream off after failed start");
            }
            self.ring.release_all();
            return Err(match err {
                RingError::Driver(source) => CameraError::StreamStartFailed(source),
                RingError::Corrupt(err) => err,
            });
        }

        self.state = SessionState::Streaming;
        debug!(buffers = self.ring.len(), "streaming started");
        Ok(())
    }

    /// Turn streaming off. No-op unless streaming.
    ///
    /// All buffers return to idle and their contents become stale. If the
    /// driver reports an error the session still leaves `Streaming`.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        self.state = SessionState::Opened;
        self.ring.release_all();

        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };
        device.stream_off().map_err(|source| {
            warn!(error = %source, "stream off failed");
            CameraError::StreamStopFailed(source)
        })?;
        debug!("streaming stopped");
        Ok(())
    }

    /// Stop, unmap and release the handle. Calling it again is a no-op.
    ///
    /// The session is closed afterwards even if a step failed; the first
    /// failure is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let stopped = self.stop();
        self.state = SessionState::Closed;

        let Some(mut device) = self.device.take() else {
            return stopped;
        };
        let unmapped = self.ring.unmap(&mut device).map_err(CameraError::CloseFailed);
        let closed = device.close().map_err(CameraError::CloseFailed);
        info!(path = %self.path.display(), "session closed");

        stopped.and(unmapped).and(closed)
    }

    /// Change resolution and pixel format.
    ///
    /// Performs a full stop, unmap, renegotiation, remap and start, so the
    /// session ends up streaming with a fresh buffer ring. Any failure closes
    /// the session.
    pub fn reconfigure(&mut self, width: u32, height: u32, fourcc: FourCC) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(self.invalid("reconfigure"));
        }
        if width == 0 || height == 0 {
            return Err(CameraError::InvalidConfig(format!(
                "resolution {width}x{height} has a zero dimension"
            )));
        }

        if let Err(err) = self.rebuild(&Format::new(width, height, fourcc)) {
            warn!(error = %err, "reconfigure failed, closing session");
            if let Err(close_err) = self.close() {
                warn!(error = %close_err, "close after failed reconfigure");
            }
            return Err(err);
        }
        Ok(())
    }

    /// [`Session::reconfigure`] taking the pixel format by name, e.g. `"yuyv"`.
    pub fn reset(&mut self, width: u32, height: u32, pixel_format: &str) -> Result<()> {
        let fourcc = pixel_format.parse()?;
        self.reconfigure(width, height, fourcc)
    }

    fn rebuild(&mut self, requested: &Format) -> Result<()> {
        self.stop()?;
        let Some(device) = self.device.as_mut() else {
            return Err(self.invalid("reconfigure"));
        };
        self.ring
            .unmap(device)
            .map_err(|source| CameraError::negotiation("unmapping buffers", source))?;

        let negotiated = negotiate(device, requested, self.interval, self.buffer_count)?;
        info!(format = %negotiated.format, buffers = negotiated.ring.len(), "session reconfigured");
        self.format = negotiated.format;
        self.interval = negotiated.interval;
        self.controls = negotiated.controls;
        self.ring = negotiated.ring;

        self.start()
    }

    /// Wait for the next frame and borrow its data.
    ///
    /// `Duration::ZERO` blocks until a frame is ready. Otherwise returns
    /// [`CameraError::Timeout`] once `timeout` elapses, without consuming a
    /// buffer. The frame borrows the session, so it cannot outlive the next
    /// acquisition or any `stop`, `close` or `reconfigure`.
    pub fn acquire(&mut self, timeout: Duration) -> Result<Frame<'_>> {
        if self.state != SessionState::Streaming {
            return Err(self.invalid("acquire"));
        }
        // The frame keeps `self.device` borrowed, so the error is built from a copy.
        let state = self.state;
        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::InvalidState {
                operation: "acquire",
                state,
            });
        };
        frame::acquire(device, &mut self.ring, timeout)
    }

    /// [`Session::acquire`] with a millisecond timeout; 0 blocks.
    pub fn get_image(&mut self, timeout_ms: u64) -> Result<Frame<'_>> {
        self.acquire(Duration::from_millis(timeout_ms))
    }

    /// Read a control by symbolic name.
    pub fn get_param(&self, name: &str) -> Result<i64> {
        let Some(device) = self.device.as_ref() else {
            return Err(self.invalid("read control"));
        };
        self.controls.get(device, name)
    }

    /// Write a control by symbolic name and return the applied value.
    pub fn set_param(&mut self, name: &str, value: i64) -> Result<i64> {
        let Some(device) = self.device.as_mut() else {
            return Err(self.invalid("write control"));
        };
        self.controls.set(device, name, value)
    }

    /// Descriptor to wait on for readiness, while open.
    pub fn descriptor(&self) -> Option<RawFd> {
        self.device.as_ref().map(CameraDevice::descriptor)
    }

    /// Negotiated width, while open.
    pub fn width(&self) -> Option<u32> {
        self.is_open().then_some(self.format.width)
    }

    /// Negotiated height, while open.
    pub fn height(&self) -> Option<u32> {
        self.is_open().then_some(self.format.height)
    }

    /// Negotiated format, while open.
    pub fn format(&self) -> Option<&Format> {
        self.is_open().then_some(&self.format)
    }

    /// Negotiated frame interval, while open.
    pub fn interval(&self) -> Option<FrameInterval> {
        self.is_open().then_some(self.interval)
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the device handle is held.
    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Device node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capabilities reported when the device opened.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Controls supported by the device.
    pub const fn controls(&self) -> &ControlRegistry {
        &self.controls
    }

    /// Buffer ring; empty once closed.
    pub const fn ring(&self) -> &BufferRing {
        &self.ring
    }

    fn invalid(&self, operation: &'static str) -> CameraError {
        CameraError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl<D: CameraDevice> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, path = %self.path.display(), "close on drop failed");
        }
    }
}

/// Negotiate format and interval, enumerate controls and map buffers.
fn negotiate<D: CameraDevice>(
    device: &mut D,
    requested: &Format,
    interval: FrameInterval,
    buffer_count: u32,
) -> Result<Negotiated> {
    let caps = device.capabilities();
    if !caps.can_capture || !caps.can_stream {
        return Err(CameraError::NegotiationFailed {
            reason: format!("{} does not support streaming capture", caps.card),
            source: None,
        });
    }

    let format = device
        .set_format(requested)
        .map_err(|source| CameraError::negotiation(format!("format {requested}"), source))?;
    if format != *requested {
        debug!(requested = %requested, negotiated = %format, "driver adjusted format");
    }

    let interval = match device.set_interval(interval) {
        Ok(applied) => applied,
        Err(err) => {
            warn!(error = %err, interval = %interval, "driver rejected frame interval");
            interval
        }
    };

    let controls = device
        .query_controls()
        .map(ControlRegistry::from_controls)
        .map_err(|source| CameraError::negotiation("control enumeration", source))?;

    let ring = BufferRing::map(device, buffer_count)
        .map_err(|source| CameraError::negotiation("buffer mapping", source))?;
    if ring.is_empty() {
        return Err(CameraError::NegotiationFailed {
            reason: "driver granted no buffers".to_owned(),
            source: None,
        });
    }

    Ok(Negotiated {
        format,
        interval,
        controls,
        ring,
    })
}

fn queue_all_and_stream<D: CameraDevice>(
    device: &mut D,
    ring: &mut BufferRing,
) -> RingResult<()> {
    for index in 0..ring.len() {
        ring.queue(device, index)?;
    }
    device.stream_on().map_err(RingError::Driver)
}

/// Release a device that never became part of a session.
fn discard<D: CameraDevice>(mut device: D) {
    if let Err(err) = device.unmap_buffers() {
        warn!(error = %err, "unmap after failed open");
    }
    if let Err(err) = device.close() {
        warn!(error = %err, "close after failed open");
    }
}
