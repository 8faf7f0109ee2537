//! Moving test pattern fed into a capture device at a fixed frame rate

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::capture::device::CaptureDevice;
use crate::capture::frame::{PixelFormat, Resolution};

/// Background task pushing a test pattern into a [`CaptureDevice`]
pub struct PatternGenerator {
    stop: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl PatternGenerator {
    /// Negotiate `resolution` on the device and start feeding it at `fps`
    #[instrument(skip(device), fields(device = device.label()))]
    pub fn start(device: CaptureDevice, resolution: Resolution, fps: u32) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let period = Duration::from_secs(1) / fps.max(1);

        device.negotiate(resolution);
        info!("Pattern generator started: {} @ {}fps", resolution, fps);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut frame = vec![0u8; resolution.pixel_count() * 4];
            let mut produced = 0u64;

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {}
                }
                render_pattern(&mut frame, resolution, produced);
                if let Err(e) = device.push_frame(resolution, PixelFormat::Rgba, &frame) {
                    warn!("Pattern generator stopping: {}", e);
                    break;
                }
                produced += 1;
            }

            info!("Pattern generator stopped after {} frames", produced);
            produced
        });

        Self { stop, handle }
    }

    /// Stop feeding and return the number of frames produced
    pub async fn stop(self) -> u64 {
        self.stop.send_replace(true);
        self.handle.await.unwrap_or_default()
    }
}

/// Diagonal gradient with a vertical bar sweeping across by frame index
pub fn render_pattern(buf: &mut [u8], resolution: Resolution, index: u64) {
    let width = resolution.width.max(1) as u64;
    let bar = index % width;

    for (i, px) in buf.chunks_exact_mut(4).enumerate() {
        let x = i as u64 % width;
        let y = i as u64 / width;
        if x == bar {
            px.copy_from_slice(&[255, 255, 255, 255]);
        } else {
            px[0] = (x * 255 / width) as u8;
            px[1] = (y * 255 / resolution.height.max(1) as u64) as u8;
            px[2] = (index % 256) as u8;
            px[3] = 255;
        }
    }
}
