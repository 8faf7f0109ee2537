//! The clip contract shared by live and finite sources

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::frame::VideoFrame;
use crate::error::Result;

pub mod live;
pub mod reader;
pub mod resolver;

pub use live::LiveClip;
pub use reader::{ReaderHandle, ReaderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipDuration {
    /// Real-time sources have no predetermined end
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipMeta {
    pub duration: ClipDuration,
    /// Pixel width, 0 until discovered or for audio-only clips
    pub width: u32,
    pub height: u32,
}

impl ClipMeta {
    /// Metadata of a live clip before its dimensions are known
    pub const fn live() -> Self {
        Self {
            duration: ClipDuration::Unbounded,
            width: 0,
            height: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Success,
}

/// Content of one tick. Built fresh on every call.
#[derive(Debug, Clone)]
pub struct TickResult {
    pub video: Option<Arc<VideoFrame>>,
    /// Sample batches, one per channel
    pub audio: Vec<Vec<f32>>,
    pub status: TickStatus,
}

/// Pull-based access to an audio/video source.
///
/// A compositor drives every clip the same way: await [`Clip::ready`], then call
/// [`Clip::tick`] on its own schedule, and [`Clip::destroy`] when done.
pub trait Clip: Send + Sync + Sized {
    /// Resolves with the metadata once the clip is usable
    fn ready(&self) -> impl Future<Output = Result<ClipMeta>> + Send;

    /// Copy of the current metadata
    fn meta(&self) -> ClipMeta;

    /// Content for the instant `time`. Returns promptly even if nothing new is available.
    fn tick(&self, time: Duration) -> impl Future<Output = TickResult> + Send;

    /// Two independent clips covering the content before and after `time`
    fn split(&self, time: Duration) -> impl Future<Output = Result<(Self, Self)>> + Send;

    /// An independent duplicate
    fn clone_clip(&self) -> impl Future<Output = Result<Self>> + Send;

    /// Release every owned resource. Safe to call more than once.
    fn destroy(&self);

    /// Real-time sources cannot be rendered faster than wall-clock time
    fn is_live(&self) -> bool {
        false
    }
}
