//! Streamclip demo: a compositor loop pulling frames from live clips

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use streamclip::capture::{CaptureDevice, DeviceOptions, PatternGenerator, Resolution};
use streamclip::{utils, Clip, Config, LiveClip, SourceKind};

/// Keeps the frame source alive for the duration of the run
enum Feeder {
    Pattern(PatternGenerator),
    #[cfg(feature = "v4l2")]
    V4l2(streamclip::capture::V4l2Source),
}

async fn open_source(config: &Config, device: &CaptureDevice) -> Result<Feeder> {
    let capture = &config.capture;
    match capture.source {
        SourceKind::Pattern => Ok(Feeder::Pattern(PatternGenerator::start(
            device.clone(),
            Resolution::new(capture.width, capture.height),
            capture.fps,
        ))),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            let mut capture = capture.clone();
            // Auto-detect capture device if needed
            if capture.device.is_empty() {
                let (path, fourcc) = utils::auto_detect_device().await?;
                capture.device = path;
                capture.fourcc = fourcc;
            }
            let source = streamclip::capture::V4l2Source::open(&capture, device.clone())?;
            info!("Using capture device: {} at {}", capture.device, source.resolution());
            Ok(Feeder::V4l2(source))
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(eyre!("built without the v4l2 feature")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    utils::init_tracing(&config.logging)?;
    streamclip::CONFIG.store(Arc::new(config.clone()));

    info!("Streamclip launching...");

    let device = CaptureDevice::new(DeviceOptions::from(&config.capture));
    let feeder = open_source(&config, &device).await?;

    let camera = LiveClip::new(device.open_stream(true, true));
    let meta = camera.ready().await?;
    info!("Camera clip ready: {}x{} ({:?})", meta.width, meta.height, meta.duration);

    let copy = camera.clone_clip().await?;
    let (left, right) = camera.split(Duration::ZERO).await?;
    let clips = [&camera, &copy, &left, &right];
    for clip in clips {
        clip.ready().await?;
    }

    let tick_rate = config.pipeline.tick_rate.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(1) / tick_rate);
    let started = Instant::now();
    let mut ticks = 0u64;
    let mut shown = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            _ = interval.tick() => {}
        }

        let time = started.elapsed();
        for (i, clip) in clips.iter().enumerate() {
            let tick = clip.tick(time).await;
            match &tick.video {
                Some(frame) if i == 0 && frame.sequence != shown => {
                    shown = frame.sequence;
                    metrics::gauge!("streamclip_latest_sequence").set(shown as f64);
                }
                Some(_) => {}
                None if ticks % u64::from(tick_rate) == 0 => {
                    warn!("Clip {} has no frame yet", clip.label());
                }
                None => {}
            }
        }

        ticks += 1;
        if ticks % u64::from(tick_rate) == 0 {
            info!(
                "{} ticks, latest frame #{}, reader {:?}",
                ticks,
                shown,
                camera.reader_status()
            );
        }
        if config.pipeline.run_ticks != 0 && ticks >= config.pipeline.run_ticks {
            break;
        }
    }

    // The copy outlives the original
    camera.destroy();
    camera.destroy();
    let tick = copy.tick(started.elapsed()).await;
    info!(
        "Copy still ticking after original destroyed: frame #{:?}",
        tick.video.map(|f| f.sequence)
    );

    for clip in [&copy, &left, &right] {
        clip.destroy();
    }

    match feeder {
        Feeder::Pattern(generator) => {
            let produced = generator.stop().await;
            info!("Pattern generator produced {} frames", produced);
        }
        #[cfg(feature = "v4l2")]
        Feeder::V4l2(source) => drop(source),
    }

    // Let the readers observe their stop signal before checking the pool
    tokio::time::sleep(Duration::from_millis(50)).await;
    let leaked = device.pool().outstanding();
    if leaked != 0 {
        return Err(eyre!("{} frame buffers were never released", leaked));
    }

    info!("Streamclip shutting down");
    Ok(())
}
