use tracing::{debug, instrument};

use crate::capture::frame::Resolution;
use crate::capture::track::VideoTrack;
use crate::error::CaptureError;

/// Discover the authoritative dimensions of `track`.
///
/// A track can report provisional dimensions until something actually consumes
/// it, so a throwaway probe is attached until the platform reports the real
/// size, then detached.
#[instrument(skip(track), fields(track = track.label()))]
pub async fn resolve_dimensions(track: &dyn VideoTrack) -> Result<Resolution, CaptureError> {
    let provisional = track.settings().resolution;
    let probe = track.attach_probe()?;
    let resolution = probe.loaded().await?;

    if resolution != provisional {
        debug!("Provisional size {} corrected to {}", provisional, resolution);
    }
    Ok(resolution)
}
