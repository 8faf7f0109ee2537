//! Platform-facing track abstractions for live capture sources

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::capture::frame::{RawFrame, Resolution};
use crate::error::CaptureError;

/// Pull side of a video track subscription
pub type FrameReceiver = flume::Receiver<Result<RawFrame, CaptureError>>;

type ReportFuture = Pin<Box<dyn Future<Output = Result<Resolution, CaptureError>> + Send>>;

/// Hint telling the platform how a video track will be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentHint {
    #[default]
    None,
    Motion,
}

/// Settings a track currently reports. May be provisional until a consumer is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSettings {
    pub resolution: Resolution,
    pub frame_rate: Option<u32>,
}

/// A transient consumer attached to a video track for one dimensions report.
///
/// Dropping the probe detaches it from the track.
pub struct DimensionProbe {
    report: Option<ReportFuture>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl DimensionProbe {
    pub fn new<F, D>(report: F, detach: D) -> Self
    where
        F: Future<Output = Result<Resolution, CaptureError>> + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        Self {
            report: Some(Box::pin(report)),
            detach: Some(Box::new(detach)),
        }
    }

    /// Wait for the authoritative dimensions, then detach
    pub async fn loaded(mut self) -> Result<Resolution, CaptureError> {
        let report = self.report.take().ok_or(CaptureError::ProbeDetached)?;
        report.await
    }
}

impl Drop for DimensionProbe {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for DimensionProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimensionProbe")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

pub trait VideoTrack: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    /// Currently reported settings; the resolution may still change once consumed
    fn settings(&self) -> TrackSettings;

    /// Attach a passive consumer that reports the authoritative dimensions once
    fn attach_probe(&self) -> Result<DimensionProbe, CaptureError>;

    /// Subscribe to captured frames
    fn frames(&self) -> Result<FrameReceiver, CaptureError>;

    /// Native duplication: a new track on the same device that stops independently
    fn duplicate(&self) -> Box<dyn VideoTrack>;

    /// Stop the track. Stopping a stopped track does nothing.
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    fn set_content_hint(&self, _hint: ContentHint) {}

    fn content_hint(&self) -> ContentHint {
        ContentHint::None
    }
}

pub trait AudioTrack: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn duplicate(&self) -> Box<dyn AudioTrack>;

    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// A live source: zero-or-one audio track and zero-or-one video track
#[derive(Debug, Default)]
pub struct LiveStream {
    pub audio: Option<Box<dyn AudioTrack>>,
    pub video: Option<Box<dyn VideoTrack>>,
}

impl LiveStream {
    pub fn new(audio: Option<Box<dyn AudioTrack>>, video: Option<Box<dyn VideoTrack>>) -> Self {
        Self { audio, video }
    }

    /// Duplicate every track with the platform's native primitive
    pub fn duplicate(&self) -> LiveStream {
        LiveStream {
            audio: self.audio.as_ref().map(|t| t.duplicate()),
            video: self.video.as_ref().map(|t| t.duplicate()),
        }
    }

    pub fn stop_all(&self) {
        if let Some(audio) = &self.audio {
            audio.stop();
        }
        if let Some(video) = &self.video {
            video.stop();
        }
    }
}
