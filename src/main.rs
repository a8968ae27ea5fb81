//! uvc-capture binary for testing camera capture.

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uvc_capture::{CaptureConfig, CameraError};

/// Poll timeout per frame; ticks without a frame are logged and skipped.
const FRAME_TIMEOUT: Duration = Duration::from_millis(500);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> uvc_capture::Result<()> {
    let mut config = CaptureConfig::default().with_resolution(1280, 720);
    if let Some(path) = std::env::args().nth(1) {
        config = config.with_path(path);
    }

    let mut session = uvc_capture::open(&config)?;

    let caps = session.capabilities();
    info!(card = %caps.card, driver = %caps.driver, "device ready");
    if let (Some(format), Some(interval)) = (session.format(), session.interval()) {
        info!(%format, %interval, buffers = session.ring().len(), "negotiated");
    }
    for control in session.controls().iter() {
        info!(
            name = %control.name,
            minimum = control.info.minimum,
            maximum = control.info.maximum,
            "control"
        );
    }

    loop {
        let err = match session.acquire(FRAME_TIMEOUT) {
            Ok(frame) => {
                info!(
                    sequence = frame.metadata.sequence,
                    bytes = frame.len(),
                    timestamp = ?frame.metadata.timestamp,
                    "frame"
                );
                continue;
            }
            Err(CameraError::Timeout) => {
                warn!("no frame within {FRAME_TIMEOUT:?}");
                continue;
            }
            Err(err) => err,
        };
        if let Err(close_err) = session.close() {
            warn!(error = %close_err, "close failed");
        }
        return Err(err);
    }
}
