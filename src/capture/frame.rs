use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel formats a capture device may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Pixel dimensions of a video track or frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable RGBA snapshot of a frame slot.
///
/// Cloning is cheap: the pixel data is shared, never copied.
#[derive(Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub resolution: Resolution,
    /// Sequence number of the raw frame this snapshot was drawn from
    pub sequence: u64,
    pub timestamp: Instant,
}

impl VideoFrame {
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// RGBA value at (x, y), `None` outside the frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let idx = (y as usize * self.resolution.width as usize + x as usize) * 4;
        let px = self.data.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("resolution", &self.resolution)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Buffers handed out to raw frames and returned when they are dropped
#[derive(Clone, Default)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

impl FramePool {
    /// Pool with `count` pre-allocated buffers of `size` bytes
    pub fn with_buffers(count: usize, size: usize) -> Self {
        let free = (0..count).map(|_| vec![0u8; size]).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer holding a copy of `data`
    pub fn acquire(&self, data: &[u8]) -> PooledBuffer {
        let mut buf = self
            .inner
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(data);
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuffer {
            data: buf,
            pool: self.inner.clone(),
        }
    }

    /// Buffers currently held by raw frames that have not been released
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("outstanding", &self.outstanding())
            .field("available", &self.available())
            .finish()
    }
}

pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.data);
        self.pool
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(buf);
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A captured frame as delivered by a video track.
///
/// The backing buffer belongs to the device pool; dropping the frame releases it.
pub struct RawFrame {
    pub data: PooledBuffer,
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl RawFrame {
    /// Bytes per row of the raw pixel data
    pub fn stride(&self) -> usize {
        self.resolution.width as usize * self.format.bytes_per_pixel()
    }

    /// Release the backing buffer back to the pool
    pub fn close(self) {}
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("resolution", &self.resolution)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .finish()
    }
}
