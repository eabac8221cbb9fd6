//! Frames and the latest-frame-wins handoff slot.
//!
//! - `Frame`: one decoded RGB image plus its capture instant.
//! - `frame_slot()`: depth-1 queue between acquisition and processing. A frame
//!   that has not been taken by the time the next one arrives is discarded,
//!   so a slow detector never builds a backlog and frames are never reordered.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;

/// One decoded frame. Ephemeral: dropped after its processing step.
pub struct Frame {
    pub image: RgbImage,
    /// Monotonic sequence assigned by the source, starting at 1.
    pub sequence: u64,
    /// When the frame was captured. Dwell timing is measured against this.
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self::captured_at(image, sequence, Instant::now())
    }

    pub fn captured_at(image: RgbImage, sequence: u64, captured_at: Instant) -> Self {
        Self {
            image,
            sequence,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Latest-frame-wins slot
// ----------------------------------------------------------------------------

/// Create a connected sender/receiver pair around a depth-1 channel.
pub fn frame_slot() -> (FrameSender, FrameReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let dropped = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    (
        FrameSender {
            tx,
            evict: rx.clone(),
            dropped: dropped.clone(),
            closed: closed.clone(),
        },
        FrameReceiver {
            rx,
            dropped,
            closed,
        },
    )
}

/// Producer half, owned by the acquisition thread.
pub struct FrameSender {
    tx: Sender<Frame>,
    /// Receiver clone used to evict a stale frame before publishing.
    evict: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameSender {
    /// Publish a frame, replacing any frame the consumer has not taken yet.
    ///
    /// Returns `false` once the consumer is gone.
    pub fn publish(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(returned)) => {
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = returned;
                }
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half, owned by the processing loop.
pub struct FrameReceiver {
    rx: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

/// Result of waiting on the slot.
#[derive(Debug)]
pub enum SlotRecv {
    Frame(Frame),
    Timeout,
    /// The producer hung up and no frame is pending.
    Closed,
}

impl FrameReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> SlotRecv {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => SlotRecv::Frame(frame),
            Err(RecvTimeoutError::Timeout) => SlotRecv::Timeout,
            Err(RecvTimeoutError::Disconnected) => SlotRecv::Closed,
        }
    }

    /// Stale frames discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
