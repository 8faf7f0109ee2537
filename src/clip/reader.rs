//! Continuous frame reader: pulls raw frames from a video track into a frame slot

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::track::FrameReceiver;
use crate::error::CaptureError;
use crate::pipeline::FrameSlot;

/// Out-of-band health of a reader. `tick()` never reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatus {
    /// No reader was started (audio-only clip, or not ready yet)
    Idle,
    Running,
    /// Stopped on request
    Stopped,
    /// The track closed its subscription
    Ended,
    /// Reading failed; the reader will not restart
    Faulted(CaptureError),
}

/// Stop handle and status of a running reader.
///
/// Dropping the handle also stops the reader.
#[derive(Debug)]
pub struct ReaderHandle {
    stop: watch::Sender<bool>,
    status: watch::Receiver<ReaderStatus>,
    task: JoinHandle<u64>,
}

impl ReaderHandle {
    /// Request termination. Calling it again has no effect.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn status(&self) -> ReaderStatus {
        self.status.borrow().clone()
    }

    /// Stop and wait for the loop to exit. Returns the number of frames drawn.
    pub async fn join(self) -> u64 {
        self.stop();
        self.task.await.unwrap_or_default()
    }
}

/// Start reading `frames` into `slot` on a background task.
///
/// Every frame received is drawn over the slot's content and then released
/// back to its pool before the next one is awaited. A read error ends the
/// loop for good.
pub fn spawn(label: String, frames: FrameReceiver, slot: Arc<FrameSlot>) -> ReaderHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let (status_tx, status) = watch::channel(ReaderStatus::Running);

    let task = tokio::spawn(async move {
        info!("Frame reader for {} started ({})", label, slot.resolution());
        let mut drawn = 0u64;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break ReaderStatus::Stopped,
                next = frames.recv_async() => match next {
                    Ok(Ok(frame)) => {
                        let started = Instant::now();
                        slot.draw(&frame);
                        frame.close();
                        drawn += 1;
                        metrics::counter!("streamclip_frames_drawn").increment(1);
                        metrics::histogram!("streamclip_frame_draw_time_us")
                            .record(started.elapsed().as_micros() as f64);
                    }
                    Ok(Err(e)) => {
                        warn!("Frame reader for {} failed: {}", label, e);
                        metrics::counter!("streamclip_reader_faults").increment(1);
                        break ReaderStatus::Faulted(e);
                    }
                    Err(_) => break ReaderStatus::Ended,
                },
            }
        };

        debug!(drawn, "Frame reader for {} exited: {:?}", label, outcome);
        status_tx.send_replace(outcome);
        drawn
    });

    ReaderHandle { stop, status, task }
}
