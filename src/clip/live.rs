//! Clip over a live capture source (camera, microphone)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::capture::track::{AudioTrack, ContentHint, LiveStream, VideoTrack};
use crate::clip::reader::{self, ReaderHandle, ReaderStatus};
use crate::clip::resolver::resolve_dimensions;
use crate::clip::{Clip, ClipMeta, TickResult, TickStatus};
use crate::error::{ClipError, Result};
use crate::pipeline::FrameSlot;

#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready(ClipMeta),
    Failed(ClipError),
}

struct Inner {
    label: String,
    stream: LiveStream,
    meta: ArcSwap<ClipMeta>,
    slot: ArcSwapOption<FrameSlot>,
    reader: Mutex<Option<ReaderHandle>>,
    destroyed: AtomicBool,
}

impl Inner {
    fn reader(&self) -> MutexGuard<'_, Option<ReaderHandle>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn meta(&self) -> ClipMeta {
        **self.meta.load()
    }

    async fn initialize(&self) -> Result<ClipMeta> {
        let Some(video) = self.stream.video.as_deref() else {
            return Ok(self.meta());
        };

        let resolution = resolve_dimensions(video).await?;

        let mut reader = self.reader();
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ClipError::Destroyed);
        }

        let slot = Arc::new(FrameSlot::new(resolution));
        let frames = video.frames()?;
        self.meta.store(Arc::new(ClipMeta {
            width: resolution.width,
            height: resolution.height,
            ..self.meta()
        }));
        *reader = Some(reader::spawn(video.label().to_owned(), frames, slot.clone()));
        self.slot.store(Some(slot));

        info!("Live clip {} ready at {}", self.label, resolution);
        Ok(self.meta())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = self.reader().as_ref() {
            reader.stop();
        }
        self.stream.stop_all();
        info!("Live clip {} destroyed", self.label);
    }
}

/// A clip wrapping a live audio/video stream.
///
/// The video track is read continuously in the background; [`Clip::tick`]
/// returns whatever frame arrived last. Audio is never delivered through
/// `tick()`: a real-time audio path consumes [`LiveClip::audio_track`]
/// directly.
///
/// Live clips must not be fed to an offline compositor that renders faster
/// than real time; [`Clip::is_live`] returns `true`.
///
/// Constructing a clip requires a Tokio runtime.
pub struct LiveClip {
    inner: Arc<Inner>,
    ready: watch::Receiver<ReadyState>,
}

impl LiveClip {
    /// Take ownership of `stream`.
    ///
    /// With a video track the clip becomes ready once the track's real
    /// dimensions are known; without one it is ready immediately.
    #[instrument(skip(stream))]
    pub fn new(stream: LiveStream) -> Self {
        let label = match (&stream.video, &stream.audio) {
            (Some(video), _) => video.label().to_owned(),
            (None, Some(audio)) => audio.label().to_owned(),
            (None, None) => "empty".to_owned(),
        };
        let has_video = stream.video.is_some();
        if let Some(video) = &stream.video {
            video.set_content_hint(ContentHint::Motion);
        }

        let inner = Arc::new(Inner {
            label,
            stream,
            meta: ArcSwap::from_pointee(ClipMeta::live()),
            slot: ArcSwapOption::empty(),
            reader: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let ready = if has_video {
            let (ready_tx, ready) = watch::channel(ReadyState::Pending);
            let task_inner = inner.clone();
            tokio::spawn(async move {
                let state = match task_inner.initialize().await {
                    Ok(meta) => ReadyState::Ready(meta),
                    Err(e) => {
                        info!("Live clip {} failed to initialize: {}", task_inner.label, e);
                        ReadyState::Failed(e)
                    }
                };
                ready_tx.send_replace(state);
            });
            debug!("Live clip {} initializing", inner.label);
            ready
        } else {
            debug!("Live clip {} has no video, ready immediately", inner.label);
            watch::channel(ReadyState::Ready(ClipMeta::live())).1
        };

        Self { inner, ready }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Audio track for the out-of-band real-time audio path
    pub fn audio_track(&self) -> Option<&dyn AudioTrack> {
        self.inner.stream.audio.as_deref()
    }

    pub fn video_track(&self) -> Option<&dyn VideoTrack> {
        self.inner.stream.video.as_deref()
    }

    /// Health of the background reader. Purely informational: `tick()` keeps
    /// succeeding whatever this reports.
    pub fn reader_status(&self) -> ReaderStatus {
        self.inner
            .reader()
            .as_ref()
            .map_or(ReaderStatus::Idle, ReaderHandle::status)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }
}

impl Clip for LiveClip {
    async fn ready(&self) -> Result<ClipMeta> {
        let mut ready = self.ready.clone();
        loop {
            let state = ready.borrow_and_update().clone();
            match state {
                ReadyState::Ready(meta) => return Ok(meta),
                ReadyState::Failed(e) => return Err(e),
                ReadyState::Pending => {}
            }
            if ready.changed().await.is_err() {
                return Err(ClipError::Destroyed);
            }
        }
    }

    fn meta(&self) -> ClipMeta {
        self.inner.meta()
    }

    /// Latest captured frame, or none before the first one. Never fails, and
    /// never waits for the reader.
    async fn tick(&self, _time: Duration) -> TickResult {
        let video = self.inner.slot.load_full().and_then(|slot| slot.snapshot());
        TickResult {
            video,
            audio: Vec::new(),
            status: TickStatus::Success,
        }
    }

    /// A live stream cannot be divided in time: both halves are independent
    /// clones of the whole source, exactly as two calls to
    /// [`Clip::clone_clip`] would produce. `time` is ignored.
    async fn split(&self, _time: Duration) -> Result<(Self, Self)> {
        Ok((self.clone_clip().await?, self.clone_clip().await?))
    }

    /// Duplicate the stream's tracks and build a new clip from them.
    ///
    /// The clone discovers its own dimensions and runs its own reader; it
    /// shares only the capture device with the original.
    async fn clone_clip(&self) -> Result<Self> {
        Ok(LiveClip::new(self.inner.stream.duplicate()))
    }

    fn destroy(&self) {
        self.inner.destroy();
    }

    fn is_live(&self) -> bool {
        true
    }
}

impl Drop for LiveClip {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

impl std::fmt::Debug for LiveClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClip")
            .field("label", &self.inner.label)
            .field("meta", &self.meta())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::{CaptureDevice, DeviceOptions};
    use crate::capture::frame::Resolution;
    use crate::clip::ClipDuration;
    use crate::error::CaptureError;

    #[tokio::test]
    async fn audio_only_clip_is_ready_immediately() {
        let device = CaptureDevice::with_resolution("mic", Resolution::default());
        let clip = LiveClip::new(device.open_stream(true, false));

        assert_eq!(clip.meta(), ClipMeta::live());
        assert_eq!(clip.ready().await, Ok(ClipMeta::live()));
        assert_eq!(clip.reader_status(), ReaderStatus::Idle);
        assert!(clip.audio_track().is_some());

        let tick = clip.tick(Duration::ZERO).await;
        assert!(tick.video.is_none());
        assert!(tick.audio.is_empty());
        assert_eq!(tick.status, TickStatus::Success);
    }

    #[tokio::test]
    async fn duration_is_unbounded_before_ready() {
        let device = CaptureDevice::new(DeviceOptions::default());
        let clip = LiveClip::new(device.open_stream(true, true));
        let meta = clip.meta();
        assert_eq!(meta.duration, ClipDuration::Unbounded);
        assert_eq!((meta.width, meta.height), (0, 0));
        assert!(clip.is_live());
    }

    #[tokio::test]
    async fn video_track_gets_motion_hint() {
        let device = CaptureDevice::with_resolution("cam", Resolution::new(4, 4));
        let track = device.video_track();
        let dup = track.duplicate();
        let clip = LiveClip::new(LiveStream::new(None, Some(dup)));
        clip.ready().await.unwrap();
        assert_eq!(clip.video_track().unwrap().content_hint(), ContentHint::Motion);
        // The hint is set on the clip's own track, not the one it was duplicated from
        assert_eq!(track.content_hint(), ContentHint::None);
    }

    #[tokio::test]
    async fn probe_failure_rejects_ready() {
        let device = CaptureDevice::new(DeviceOptions::default());
        let clip = LiveClip::new(device.open_stream(false, true));

        device.fail(CaptureError::Disconnected("cam".into()));
        assert_eq!(
            clip.ready().await,
            Err(ClipError::Initialization(CaptureError::Disconnected("cam".into())))
        );
        assert_eq!(clip.reader_status(), ReaderStatus::Idle);
        clip.destroy();
    }

    #[tokio::test]
    async fn destroy_during_initialization_starts_no_reader() {
        let device = CaptureDevice::new(DeviceOptions::default());
        let clip = LiveClip::new(device.open_stream(true, true));

        clip.destroy();
        assert!(clip.ready().await.is_err());
        assert_eq!(clip.reader_status(), ReaderStatus::Idle);
        assert_eq!(device.subscriber_count(), 0);
        assert_eq!(device.attached_probes(), 0);
    }

    #[tokio::test]
    async fn ready_can_be_awaited_repeatedly() {
        let device = CaptureDevice::with_resolution("cam", Resolution::new(8, 6));
        let clip = LiveClip::new(device.open_stream(false, true));

        let first = clip.ready().await.unwrap();
        let second = clip.ready().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(clip.meta(), first);
    }
}
