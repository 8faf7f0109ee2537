//! In-process capture device.
//!
//! A [`CaptureDevice`] is fed frames by a source (test pattern, V4L2 camera,
//! application code) and fans them out to every subscribed video track. Each
//! subscription gets its own copy from the device pool through a bounded
//! channel; when a subscriber falls behind, new frames are dropped for it
//! rather than queued.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::capture::frame::{FramePool, PixelFormat, RawFrame, Resolution};
use crate::capture::track::{
    AudioTrack, ContentHint, DimensionProbe, FrameReceiver, LiveStream, TrackSettings, VideoTrack,
};
use crate::error::CaptureError;
use crate::CaptureConfig;

type Report = Option<Result<Resolution, CaptureError>>;

/// Construction options for a [`CaptureDevice`]
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub label: String,
    /// Dimensions reported before the device has negotiated its real format
    pub provisional: Resolution,
    pub frame_rate: Option<u32>,
    pub buffer_count: usize,
    /// Frames buffered per subscription before new ones are dropped
    pub channel_depth: usize,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            label: "virtual-camera".into(),
            provisional: Resolution::new(640, 480),
            frame_rate: None,
            buffer_count: 4,
            channel_depth: 2,
        }
    }
}

impl From<&CaptureConfig> for DeviceOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            label: config.device.clone(),
            provisional: Resolution::new(config.width, config.height),
            frame_rate: Some(config.fps),
            buffer_count: config.buffer_count as usize,
            channel_depth: config.channel_depth.max(1),
        }
    }
}

struct Subscriber {
    track_id: u64,
    tx: flume::Sender<Result<RawFrame, CaptureError>>,
}

struct DeviceShared {
    options: DeviceOptions,
    report: watch::Sender<Report>,
    subscribers: Mutex<Vec<Subscriber>>,
    pool: FramePool,
    sequence: AtomicU64,
    next_track_id: AtomicU64,
    attached_probes: AtomicUsize,
    dropped_frames: AtomicU64,
}

impl DeviceShared {
    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unsubscribe(&self, track_id: u64) -> usize {
        let mut subs = self.subscribers();
        let before = subs.len();
        subs.retain(|s| s.track_id != track_id);
        before - subs.len()
    }

    fn next_track_id(&self) -> u64 {
        self.next_track_id.fetch_add(1, Ordering::Relaxed)
    }

    fn negotiated(&self) -> Option<Resolution> {
        match &*self.report.borrow() {
            Some(Ok(res)) => Some(*res),
            _ => None,
        }
    }
}

/// Shared capture device. Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct CaptureDevice {
    shared: Arc<DeviceShared>,
}

impl CaptureDevice {
    pub fn new(options: DeviceOptions) -> Self {
        let frame_bytes = options.provisional.pixel_count() * PixelFormat::Rgba.bytes_per_pixel();
        let pool = FramePool::with_buffers(options.buffer_count, frame_bytes);
        let (report, _) = watch::channel(None);

        info!(
            "Capture device {} created ({} provisional, {} buffers)",
            options.label, options.provisional, options.buffer_count
        );

        Self {
            shared: Arc::new(DeviceShared {
                options,
                report,
                subscribers: Mutex::new(Vec::new()),
                pool,
                sequence: AtomicU64::new(0),
                next_track_id: AtomicU64::new(1),
                attached_probes: AtomicUsize::new(0),
                dropped_frames: AtomicU64::new(0),
            }),
        }
    }

    /// Device that has already negotiated `resolution`
    pub fn with_resolution(label: impl Into<String>, resolution: Resolution) -> Self {
        let device = Self::new(DeviceOptions {
            label: label.into(),
            provisional: resolution,
            ..DeviceOptions::default()
        });
        device.negotiate(resolution);
        device
    }

    pub fn label(&self) -> &str {
        &self.shared.options.label
    }

    pub fn pool(&self) -> &FramePool {
        &self.shared.pool
    }

    /// Authoritative resolution, once negotiated
    pub fn resolution(&self) -> Option<Resolution> {
        self.shared.negotiated()
    }

    /// Publish the authoritative resolution to attached probes
    pub fn negotiate(&self, resolution: Resolution) {
        debug!("Device {} negotiated {}", self.label(), resolution);
        self.shared.report.send_replace(Some(Ok(resolution)));
    }

    /// Report a device fault.
    ///
    /// Probes still waiting for dimensions fail, and every frame subscription
    /// receives the error and is then closed.
    pub fn fail(&self, error: CaptureError) {
        warn!("Device {} failed: {}", self.label(), error);
        self.shared.report.send_if_modified(|report| {
            if report.as_ref().map_or(true, |r| r.is_err()) {
                *report = Some(Err(error.clone()));
                true
            } else {
                false
            }
        });

        let subs = std::mem::take(&mut *self.shared.subscribers());
        for sub in subs {
            if sub.tx.try_send(Err(error.clone())).is_err() {
                debug!("Subscription of track {} already closed", sub.track_id);
            }
        }
    }

    /// Deliver one frame to every subscribed track. Returns how many received it.
    pub fn push_frame(
        &self,
        resolution: Resolution,
        format: PixelFormat,
        data: &[u8],
    ) -> Result<usize, CaptureError> {
        let expected = resolution.pixel_count() * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(CaptureError::FrameSize {
                expected,
                actual: data.len(),
            });
        }

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp = Instant::now();
        let depth = self.shared.options.channel_depth;
        let mut delivered = 0;

        self.shared.subscribers().retain(|sub| {
            if sub.tx.is_disconnected() {
                return false;
            }
            // The last slot of every channel is held back for a fault
            if sub.tx.len() >= depth {
                self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("streamclip_frames_dropped").increment(1);
                return true;
            }
            let frame = RawFrame {
                data: self.shared.pool.acquire(data),
                resolution,
                format,
                sequence,
                timestamp,
            };
            match sub.tx.try_send(Ok(frame)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(flume::TrySendError::Full(_)) => {
                    self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("streamclip_frames_dropped").increment(1);
                    true
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            }
        });

        trace!(sequence, delivered, "Frame pushed to {}", self.label());
        Ok(delivered)
    }

    pub fn video_track(&self) -> CaptureVideoTrack {
        CaptureVideoTrack::new(self.shared.clone(), false, ContentHint::None)
    }

    pub fn audio_track(&self) -> CaptureAudioTrack {
        CaptureAudioTrack::new(self.shared.clone(), false)
    }

    /// Open a live stream with the requested tracks
    pub fn open_stream(&self, audio: bool, video: bool) -> LiveStream {
        LiveStream::new(
            audio.then(|| Box::new(self.audio_track()) as Box<dyn AudioTrack>),
            video.then(|| Box::new(self.video_track()) as Box<dyn VideoTrack>),
        )
    }

    /// Active frame subscriptions across all tracks
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Dimension probes currently attached
    pub fn attached_probes(&self) -> usize {
        self.shared.attached_probes.load(Ordering::Acquire)
    }

    /// Frames dropped because a subscriber was not keeping up
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDevice")
            .field("label", &self.label())
            .field("resolution", &self.resolution())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Video track of a [`CaptureDevice`]
pub struct CaptureVideoTrack {
    device: Arc<DeviceShared>,
    id: u64,
    label: String,
    stopped: watch::Sender<bool>,
    hint: Mutex<ContentHint>,
}

impl CaptureVideoTrack {
    fn new(device: Arc<DeviceShared>, stopped: bool, hint: ContentHint) -> Self {
        let id = device.next_track_id();
        let label = format!("{}#video{}", device.options.label, id);
        let (stopped, _) = watch::channel(stopped);
        Self {
            device,
            id,
            label,
            stopped,
            hint: Mutex::new(hint),
        }
    }
}

impl VideoTrack for CaptureVideoTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn settings(&self) -> TrackSettings {
        TrackSettings {
            resolution: self
                .device
                .negotiated()
                .unwrap_or(self.device.options.provisional),
            frame_rate: self.device.options.frame_rate,
        }
    }

    fn attach_probe(&self) -> Result<DimensionProbe, CaptureError> {
        if self.is_stopped() {
            return Err(CaptureError::TrackStopped(self.label.clone()));
        }

        self.device.attached_probes.fetch_add(1, Ordering::AcqRel);
        let mut report = self.device.report.subscribe();
        let mut stopped = self.stopped.subscribe();
        let label = self.label.clone();
        let device = self.device.clone();

        let loaded = async move {
            loop {
                let current = report.borrow_and_update().clone();
                if let Some(result) = current {
                    return result;
                }
                if *stopped.borrow_and_update() {
                    return Err(CaptureError::TrackStopped(label));
                }
                tokio::select! {
                    res = report.changed() => if res.is_err() {
                        return Err(CaptureError::ProbeDetached);
                    },
                    res = stopped.changed() => if res.is_err() {
                        return Err(CaptureError::TrackStopped(label));
                    },
                }
            }
        };
        let detach = move || {
            device.attached_probes.fetch_sub(1, Ordering::AcqRel);
        };

        Ok(DimensionProbe::new(loaded, detach))
    }

    fn frames(&self) -> Result<FrameReceiver, CaptureError> {
        if self.is_stopped() {
            return Err(CaptureError::TrackStopped(self.label.clone()));
        }
        let (tx, rx) = flume::bounded(self.device.options.channel_depth + 1);
        self.device.subscribers().push(Subscriber {
            track_id: self.id,
            tx,
        });
        debug!("Track {} subscribed to frames", self.label);
        Ok(rx)
    }

    fn duplicate(&self) -> Box<dyn VideoTrack> {
        let dup = CaptureVideoTrack::new(
            self.device.clone(),
            self.is_stopped(),
            self.content_hint(),
        );
        debug!("Track {} duplicated as {}", self.label, dup.label);
        Box::new(dup)
    }

    fn stop(&self) {
        if self.stopped.send_replace(true) {
            return;
        }
        let closed = self.device.unsubscribe(self.id);
        debug!("Track {} stopped ({} subscriptions closed)", self.label, closed);
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    fn set_content_hint(&self, hint: ContentHint) {
        *self.hint.lock().unwrap_or_else(|e| e.into_inner()) = hint;
    }

    fn content_hint(&self) -> ContentHint {
        *self.hint.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CaptureVideoTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureVideoTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureVideoTrack")
            .field("label", &self.label)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Audio track of a [`CaptureDevice`]. Samples are consumed out of band.
#[derive(Debug)]
pub struct CaptureAudioTrack {
    label: String,
    device: Arc<DeviceShared>,
    stopped: AtomicBool,
}

impl CaptureAudioTrack {
    fn new(device: Arc<DeviceShared>, stopped: bool) -> Self {
        let label = format!("{}#audio{}", device.options.label, device.next_track_id());
        Self {
            label,
            device,
            stopped: AtomicBool::new(stopped),
        }
    }
}

impl AudioTrack for CaptureAudioTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn duplicate(&self) -> Box<dyn AudioTrack> {
        Box::new(CaptureAudioTrack::new(self.device.clone(), self.is_stopped()))
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Track {} stopped", self.label);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceShared")
            .field("label", &self.options.label)
            .finish()
    }
}
