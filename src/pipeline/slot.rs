//! Single-slot, last-writer-wins frame buffer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use crossbeam::utils::CachePadded;

use crate::capture::frame::{PixelFormat, RawFrame, Resolution, VideoFrame};

/// Holds the most recently drawn frame, RGBA at a fixed size.
///
/// The reader task is the only writer. Each draw builds a new immutable frame
/// and swaps it in, so snapshots taken by `tick()` are never partially written
/// and the writer never waits on them.
pub struct FrameSlot {
    resolution: Resolution,
    current: ArcSwapOption<VideoFrame>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
}

impl FrameSlot {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            current: ArcSwapOption::empty(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Draw `frame` at the origin, replacing whatever the slot held.
    ///
    /// Pixels outside the raw frame are transparent; pixels beyond the slot are cropped.
    pub fn draw(&self, frame: &RawFrame) {
        let rgba = if frame.resolution == self.resolution && frame.format == PixelFormat::Rgba {
            frame.data.to_vec()
        } else {
            self.convert(frame)
        };

        self.current.store(Some(Arc::new(VideoFrame {
            data: Bytes::from(rgba),
            resolution: self.resolution,
            sequence: frame.sequence,
            timestamp: frame.timestamp,
        })));
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    fn convert(&self, frame: &RawFrame) -> Vec<u8> {
        let mut out = vec![0u8; self.resolution.pixel_count() * 4];
        let bpp = frame.format.bytes_per_pixel();
        let stride = frame.stride();
        let cols = self.resolution.width.min(frame.resolution.width) as usize;
        let rows = self.resolution.height.min(frame.resolution.height) as usize;
        let out_stride = self.resolution.width as usize * 4;

        for y in 0..rows {
            let Some(src_row) = frame.data.get(y * stride..y * stride + cols * bpp) else {
                break;
            };
            let dst_row = &mut out[y * out_stride..y * out_stride + cols * 4];

            for (src, dst) in src_row.chunks_exact(bpp).zip(dst_row.chunks_exact_mut(4)) {
                match frame.format {
                    PixelFormat::Rgba => dst.copy_from_slice(src),
                    PixelFormat::Bgra => {
                        dst[0] = src[2]; // R
                        dst[1] = src[1]; // G
                        dst[2] = src[0]; // B
                        dst[3] = src[3]; // A
                    }
                    PixelFormat::Rgb24 => {
                        dst[..3].copy_from_slice(src);
                        dst[3] = 255;
                    }
                }
            }
        }
        out
    }

    /// Current frame, if anything has been drawn yet
    pub fn snapshot(&self) -> Option<Arc<VideoFrame>> {
        let frame = self.current.load_full();
        if frame.is_some() {
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// (frames written, snapshots taken)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (written, read) = self.stats();
        f.debug_struct("FrameSlot")
            .field("resolution", &self.resolution)
            .field("frames_written", &written)
            .field("frames_read", &read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::capture::frame::FramePool;

    fn raw(pool: &FramePool, res: Resolution, format: PixelFormat, data: &[u8], seq: u64) -> RawFrame {
        RawFrame {
            data: pool.acquire(data),
            resolution: res,
            format,
            sequence: seq,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn empty_until_first_draw() {
        let slot = FrameSlot::new(Resolution::new(2, 2));
        assert!(slot.snapshot().is_none());
        assert_eq!(slot.stats(), (0, 0));
    }

    #[test]
    fn newest_frame_replaces_previous() {
        let pool = FramePool::default();
        let res = Resolution::new(2, 1);
        let slot = FrameSlot::new(res);

        slot.draw(&raw(&pool, res, PixelFormat::Rgba, &[1; 8], 1));
        let first = slot.snapshot().unwrap();
        slot.draw(&raw(&pool, res, PixelFormat::Rgba, &[2; 8], 2));
        let second = slot.snapshot().unwrap();

        // Earlier snapshots are unaffected by later draws
        assert_eq!(first.sequence, 1);
        assert_eq!(&first.data[..], &[1; 8]);
        assert_eq!(second.sequence, 2);
        assert_eq!(&second.data[..], &[2; 8]);
        assert_eq!(slot.stats(), (2, 2));
    }

    #[test]
    fn converts_bgra_and_rgb() {
        let pool = FramePool::default();
        let res = Resolution::new(1, 1);
        let slot = FrameSlot::new(res);

        slot.draw(&raw(&pool, res, PixelFormat::Bgra, &[10, 20, 30, 40], 1));
        assert_eq!(slot.snapshot().unwrap().pixel(0, 0), Some([30, 20, 10, 40]));

        slot.draw(&raw(&pool, res, PixelFormat::Rgb24, &[10, 20, 30], 2));
        assert_eq!(slot.snapshot().unwrap().pixel(0, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn smaller_frame_is_drawn_at_origin_and_padded() {
        let pool = FramePool::default();
        let slot = FrameSlot::new(Resolution::new(2, 2));

        slot.draw(&raw(&pool, Resolution::new(1, 1), PixelFormat::Rgba, &[9; 4], 1));
        let frame = slot.snapshot().unwrap();
        assert_eq!(frame.resolution, Resolution::new(2, 2));
        assert_eq!(frame.pixel(0, 0), Some([9; 4]));
        assert_eq!(frame.pixel(1, 1), Some([0; 4]));
    }

    #[test]
    fn larger_frame_is_cropped() {
        let pool = FramePool::default();
        let slot = FrameSlot::new(Resolution::new(1, 1));
        let data: Vec<u8> = (0..16).collect();

        slot.draw(&raw(&pool, Resolution::new(2, 2), PixelFormat::Rgba, &data, 1));
        let frame = slot.snapshot().unwrap();
        assert_eq!(frame.data.len(), 4);
        assert_eq!(frame.pixel(0, 0), Some([0, 1, 2, 3]));
    }
}
