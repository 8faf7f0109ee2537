pub mod device;
pub mod frame;
pub mod pattern;
pub mod track;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use device::{CaptureAudioTrack, CaptureDevice, CaptureVideoTrack, DeviceOptions};
pub use frame::{FramePool, PixelFormat, RawFrame, Resolution, VideoFrame};
pub use pattern::PatternGenerator;
pub use track::{AudioTrack, ContentHint, DimensionProbe, LiveStream, VideoTrack};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
