//! V4L2 camera feeding a [`CaptureDevice`] through memory-mapped buffers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::CaptureDevice;
use crate::capture::frame::{PixelFormat, Resolution};
use crate::error::CaptureError;
use crate::CaptureConfig;

const MJPG: &[u8; 4] = b"MJPG";
const RGB3: &[u8; 4] = b"RGB3";

fn device_error(e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Device(e.to_string())
}

/// Capture thread reading a V4L2 device
pub struct V4l2Source {
    stop: Arc<AtomicBool>,
    resolution: Resolution,
}

impl V4l2Source {
    /// Open the camera named by `config.device` and start feeding `device`.
    ///
    /// Returns once the driver has accepted a format; the negotiated resolution
    /// is published to `device` with the first captured frame.
    #[instrument(skip(config, device), fields(path = %config.device))]
    pub fn open(config: &CaptureConfig, device: CaptureDevice) -> Result<Self, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (setup_tx, setup_rx) = mpsc::channel();
        let config = config.clone();
        let thread_stop = stop.clone();

        thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                let stream = match Self::configure(&config) {
                    Ok((stream, resolution, fourcc)) => {
                        let _ = setup_tx.send(Ok(resolution));
                        (stream, resolution, fourcc)
                    }
                    Err(e) => {
                        let _ = setup_tx.send(Err(e));
                        return;
                    }
                };
                Self::run(stream, device, &config.device, &thread_stop);
            })
            .map_err(device_error)?;

        let resolution = setup_rx
            .recv()
            .map_err(|_| CaptureError::Device("capture thread exited during setup".into()))??;

        Ok(Self { stop, resolution })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn configure(
        config: &CaptureConfig,
    ) -> Result<(MmapStream<'static>, Resolution, FourCC), CaptureError> {
        let dev = Device::with_path(&config.device).map_err(device_error)?;

        let caps = dev.query_caps().map_err(device_error)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Device(
                "device doesn't support video capture".into(),
            ));
        }

        let mut fmt = dev.format().map_err(device_error)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.fourcc.as_str() {
            "MJPG" => FourCC::new(MJPG),
            "RGB3" => FourCC::new(RGB3),
            other => {
                return Err(CaptureError::Device(format!(
                    "unsupported pixel format {other}"
                )))
            }
        };

        // The driver may adjust the request; what it returns is authoritative
        let fmt = dev.set_format(&fmt).map_err(device_error)?;
        let resolution = Resolution::new(fmt.width, fmt.height);

        let stream = MmapStream::with_buffers(&dev, Type::VideoCapture, config.buffer_count)
            .map_err(device_error)?;
        info!(
            "Capture stream started with {} buffers at {}",
            config.buffer_count, resolution
        );

        Ok((stream, resolution, fmt.fourcc))
    }

    fn run(
        (mut stream, resolution, fourcc): (MmapStream<'static>, Resolution, FourCC),
        device: CaptureDevice,
        path: &str,
        stop: &AtomicBool,
    ) {
        let mut negotiated = false;

        while !stop.load(Ordering::Acquire) {
            let buf = match stream.next() {
                Ok((buf, _meta)) => buf,
                Err(e) => {
                    device.fail(CaptureError::Disconnected(format!("{path}: {e}")));
                    return;
                }
            };

            let pixels = if fourcc == FourCC::new(MJPG) {
                match zune_jpeg::JpegDecoder::new(buf).decode() {
                    Ok(pixels) => pixels,
                    Err(e) => {
                        debug!("Skipping undecodable frame: {:?}", e);
                        continue;
                    }
                }
            } else {
                buf.to_vec()
            };

            if !negotiated {
                device.negotiate(resolution);
                negotiated = true;
            }

            match device.push_frame(resolution, PixelFormat::Rgb24, &pixels) {
                Ok(_) => {}
                Err(CaptureError::FrameSize { expected, actual }) => {
                    warn!("Dropping frame of {} bytes, expected {}", actual, expected);
                }
                Err(e) => {
                    device.fail(e);
                    return;
                }
            }
        }

        info!("V4L2 capture on {} stopped", path);
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Whether the device at `path` can capture in a format this feeder decodes
pub fn probe_device(path: &str) -> Option<String> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return None;
    }
    dev.enum_formats()
        .ok()?
        .into_iter()
        .find(|fmt| fmt.fourcc == FourCC::new(MJPG) || fmt.fourcc == FourCC::new(RGB3))
        .map(|fmt| {
            info!("Found {} device: {} - {}", fmt.fourcc, path, caps.card);
            fmt.fourcc.str().unwrap_or("MJPG").to_owned()
        })
}
