use tracing_subscriber::fmt::time::Uptime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::ClipError;
use crate::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ClipError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ClipError::Config(format!("invalid log filter: {e}")))?;

    let fmt = tracing_subscriber::fmt::layer();
    let fmt = if config.uptime_timer {
        fmt.with_timer(Uptime::default()).boxed()
    } else {
        fmt.boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry
        .try_init()
        .map_err(|e| ClipError::Config(format!("tracing already initialized: {e}")))
}

/// Auto-detect best capture device
#[cfg(feature = "v4l2")]
pub async fn auto_detect_device() -> Result<(String, String), ClipError> {
    use std::path::Path;

    tracing::info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }
        if let Some(fourcc) = crate::capture::v4l2::probe_device(&path) {
            return Ok((path, fourcc));
        }
    }

    Err(ClipError::Config("no suitable capture device found".into()))
}
