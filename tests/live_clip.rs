use std::time::Duration;

use streamclip::capture::{
    AudioTrack, CaptureDevice, DeviceOptions, PixelFormat, Resolution, VideoTrack,
};
use streamclip::clip::ReaderStatus;
use streamclip::{CaptureError, Clip, ClipDuration, ClipMeta, LiveClip, TickStatus};

const WAIT: Duration = Duration::from_secs(2);

fn solid(res: Resolution, value: u8) -> Vec<u8> {
    vec![value; res.pixel_count() * 4]
}

/// Tick until the clip shows frame `sequence` or later
async fn wait_for_frame(clip: &LiveClip, sequence: u64) {
    tokio::time::timeout(WAIT, async {
        loop {
            let tick = clip.tick(Duration::ZERO).await;
            if tick.video.is_some_and(|f| f.sequence >= sequence) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("frame never reached the clip");
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn camera_with_microphone_reports_720p() {
    let res = Resolution::new(1280, 720);
    let device = CaptureDevice::with_resolution("cam", res);
    let clip = LiveClip::new(device.open_stream(true, true));

    let meta = clip.ready().await.unwrap();
    assert_eq!(
        meta,
        ClipMeta {
            duration: ClipDuration::Unbounded,
            width: 1280,
            height: 720,
        }
    );
    assert_eq!(clip.meta(), meta);

    device.push_frame(res, PixelFormat::Rgba, &solid(res, 42)).unwrap();
    wait_for_frame(&clip, 1).await;

    let tick = clip.tick(Duration::ZERO).await;
    let frame = tick.video.expect("video frame");
    assert_eq!((frame.width(), frame.height()), (1280, 720));
    assert_eq!(frame.pixel(640, 360), Some([42; 4]));
    assert!(tick.audio.is_empty());
    assert_eq!(tick.status, TickStatus::Success);
}

#[tokio::test]
async fn meta_waits_for_the_authoritative_size() {
    let device = CaptureDevice::new(DeviceOptions {
        label: "cam".into(),
        provisional: Resolution::new(3452, 2240),
        ..DeviceOptions::default()
    });
    let clip = LiveClip::new(device.open_stream(false, true));

    wait_until(|| device.attached_probes() == 1).await;
    assert_eq!(clip.meta(), ClipMeta::live());

    // Ticking while still initializing yields nothing but succeeds
    let tick = clip.tick(Duration::ZERO).await;
    assert!(tick.video.is_none());
    assert!(tick.audio.is_empty());
    assert_eq!(tick.status, TickStatus::Success);

    device.negotiate(Resolution::new(3452, 1940));
    let meta = clip.ready().await.unwrap();
    assert_eq!((meta.width, meta.height), (3452, 1940));
    assert_eq!(device.attached_probes(), 0);
}

#[tokio::test]
async fn audio_only_clip_is_ready_without_dimensions() {
    let device = CaptureDevice::new(DeviceOptions::default());
    let clip = LiveClip::new(device.open_stream(true, false));

    assert_eq!(
        clip.ready().await.unwrap(),
        ClipMeta {
            duration: ClipDuration::Unbounded,
            width: 0,
            height: 0,
        }
    );
    assert_eq!(device.attached_probes(), 0);
    assert_eq!(device.subscriber_count(), 0);
}

#[tokio::test]
async fn ticks_are_empty_before_the_first_frame() {
    let device = CaptureDevice::with_resolution("cam", Resolution::new(64, 48));
    let clip = LiveClip::new(device.open_stream(true, true));
    clip.ready().await.unwrap();

    for _ in 0..3 {
        let tick = clip.tick(Duration::ZERO).await;
        assert!(tick.video.is_none());
        assert!(tick.audio.is_empty());
        assert_eq!(tick.status, TickStatus::Success);
    }
}

#[tokio::test]
async fn repeated_ticks_return_the_same_frame_until_a_new_one_arrives() {
    let res = Resolution::new(16, 16);
    let device = CaptureDevice::with_resolution("cam", res);
    let clip = LiveClip::new(device.open_stream(false, true));
    clip.ready().await.unwrap();

    device.push_frame(res, PixelFormat::Rgba, &solid(res, 1)).unwrap();
    wait_for_frame(&clip, 1).await;
    let a = clip.tick(Duration::ZERO).await.video.unwrap();
    let b = clip.tick(Duration::from_millis(16)).await.video.unwrap();
    assert_eq!(a.sequence, b.sequence);

    device.push_frame(res, PixelFormat::Rgba, &solid(res, 2)).unwrap();
    wait_for_frame(&clip, 2).await;
    let c = clip.tick(Duration::from_millis(32)).await.video.unwrap();
    assert_eq!(c.sequence, 2);
    assert_eq!(c.pixel(0, 0), Some([2; 4]));
    // The earlier snapshot is untouched
    assert_eq!(a.pixel(0, 0), Some([1; 4]));
}

#[tokio::test]
async fn clone_keeps_ticking_after_original_is_destroyed() {
    let res = Resolution::new(32, 24);
    let device = CaptureDevice::with_resolution("cam", res);
    let original = LiveClip::new(device.open_stream(true, true));
    original.ready().await.unwrap();

    let copy = original.clone_clip().await.unwrap();
    assert_eq!(copy.ready().await.unwrap(), original.meta());
    assert_eq!(device.subscriber_count(), 2);

    original.destroy();
    assert!(original.video_track().unwrap().is_stopped());
    assert!(original.audio_track().unwrap().is_stopped());
    assert!(!copy.video_track().unwrap().is_stopped());
    assert!(!copy.audio_track().unwrap().is_stopped());
    assert_eq!(device.subscriber_count(), 1);

    device.push_frame(res, PixelFormat::Rgba, &solid(res, 9)).unwrap();
    wait_for_frame(&copy, 1).await;
    assert_eq!(copy.reader_status(), ReaderStatus::Running);

    // The original never saw the frame
    assert!(original.tick(Duration::ZERO).await.video.is_none());
}

#[tokio::test]
async fn split_yields_two_independent_clones() {
    let res = Resolution::new(8, 8);
    let device = CaptureDevice::with_resolution("cam", res);
    let clip = LiveClip::new(device.open_stream(true, true));
    let meta = clip.ready().await.unwrap();

    let (left, right) = clip.split(Duration::from_secs(5)).await.unwrap();
    assert_eq!(left.ready().await.unwrap(), meta);
    assert_eq!(right.ready().await.unwrap(), meta);
    assert!(left.is_live() && right.is_live());
    assert_eq!(device.subscriber_count(), 3);

    left.destroy();
    device.push_frame(res, PixelFormat::Rgba, &solid(res, 5)).unwrap();
    wait_for_frame(&right, 1).await;
    wait_for_frame(&clip, 1).await;
    assert!(left.tick(Duration::ZERO).await.video.is_none());

    right.destroy();
    assert!(!clip.video_track().unwrap().is_stopped());
}

#[tokio::test]
async fn destroy_is_idempotent_and_stops_production() {
    let res = Resolution::new(8, 8);
    let device = CaptureDevice::with_resolution("cam", res);
    let clip = LiveClip::new(device.open_stream(true, true));
    clip.ready().await.unwrap();

    device.push_frame(res, PixelFormat::Rgba, &solid(res, 1)).unwrap();
    wait_for_frame(&clip, 1).await;

    clip.destroy();
    clip.destroy();
    assert!(clip.is_destroyed());
    wait_until(|| clip.reader_status() == ReaderStatus::Stopped).await;

    assert_eq!(device.push_frame(res, PixelFormat::Rgba, &solid(res, 2)).unwrap(), 0);
    let tick = clip.tick(Duration::ZERO).await;
    assert_eq!(tick.video.map(|f| f.sequence), Some(1));
    assert_eq!(tick.status, TickStatus::Success);
}

#[tokio::test]
async fn reader_fault_leaves_ticks_successful() {
    let res = Resolution::new(8, 8);
    let device = CaptureDevice::with_resolution("cam", res);
    let clip = LiveClip::new(device.open_stream(false, true));
    clip.ready().await.unwrap();

    device.push_frame(res, PixelFormat::Rgba, &solid(res, 3)).unwrap();
    wait_for_frame(&clip, 1).await;

    device.fail(CaptureError::Disconnected("cam".into()));
    wait_until(|| matches!(clip.reader_status(), ReaderStatus::Faulted(_))).await;

    let tick = clip.tick(Duration::ZERO).await;
    assert_eq!(tick.status, TickStatus::Success);
    assert_eq!(tick.video.map(|f| f.sequence), Some(1));
}

#[tokio::test]
async fn clone_and_destroy_cycles_release_every_frame() {
    let res = Resolution::new(8, 8);
    let device = CaptureDevice::with_resolution("cam", res);
    let clip = LiveClip::new(device.open_stream(true, true));
    clip.ready().await.unwrap();

    for round in 0..5u8 {
        let copy = clip.clone_clip().await.unwrap();
        copy.ready().await.unwrap();
        for _ in 0..4 {
            device.push_frame(res, PixelFormat::Rgba, &solid(res, round)).unwrap();
        }
        copy.destroy();
    }
    clip.destroy();

    wait_until(|| device.pool().outstanding() == 0 && device.subscriber_count() == 0).await;
}

#[tokio::test]
async fn cloning_a_destroyed_clip_fails_to_initialize() {
    let device = CaptureDevice::with_resolution("cam", Resolution::new(8, 8));
    let clip = LiveClip::new(device.open_stream(false, true));
    clip.ready().await.unwrap();
    clip.destroy();

    let copy = clip.clone_clip().await.unwrap();
    assert!(copy.ready().await.is_err());
}
