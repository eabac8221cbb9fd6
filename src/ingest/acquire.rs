//! Background frame acquisition.
//!
//! One thread pulls from the video source as fast as the source allows and
//! publishes into the latest-frame-wins slot. Read failures are retried with
//! a short backoff until `FailureBudget` runs out; end of stream, shutdown
//! or a departed consumer end the thread cleanly.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::FrameSender;
use crate::pipeline::ShutdownSignal;

const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Consecutive read-failure allowance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureBudget {
    max_consecutive: u32,
    consecutive: u32,
    total: u64,
}

impl FailureBudget {
    pub fn new(max_consecutive: u32) -> Self {
        Self {
            max_consecutive: max_consecutive.max(1),
            consecutive: 0,
            total: 0,
        }
    }

    /// Count a failed read. Errors once the allowance is used up.
    pub fn record_failure(&mut self, err: &anyhow::Error) -> Result<()> {
        self.consecutive = self.consecutive.saturating_add(1);
        self.total += 1;
        if self.consecutive >= self.max_consecutive {
            return Err(anyhow!(
                "video source failed {} consecutive reads; last error: {:#}",
                self.consecutive,
                err
            ));
        }
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Delay before the next read attempt, growing with the failure streak.
    pub fn backoff(&self) -> Duration {
        (Duration::from_millis(50) * self.consecutive).min(MAX_BACKOFF)
    }
}

/// What the acquisition thread did before it stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub end_of_stream: bool,
}

pub struct AcquisitionHandle {
    join: JoinHandle<Result<AcquisitionSummary>>,
}

impl AcquisitionHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait up to `timeout` for the thread. `None` means it is still blocked
    /// inside the source and has been left behind.
    pub fn finish(self, timeout: Duration) -> Option<Result<AcquisitionSummary>> {
        let deadline = Instant::now().checked_add(timeout);
        while !self.join.is_finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                log::warn!("acquisition thread still blocked on the source; detaching");
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Some(
            self.join
                .join()
                .unwrap_or_else(|_| Err(anyhow!("acquisition thread panicked"))),
        )
    }
}

/// Start pulling from an already connected source.
pub fn spawn_acquisition(
    mut source: Box<dyn FrameSource>,
    slot: FrameSender,
    shutdown: ShutdownSignal,
    mut budget: FailureBudget,
) -> AcquisitionHandle {
    let join = std::thread::spawn(move || {
        let mut summary = AcquisitionSummary::default();
        while !shutdown.is_triggered() {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    budget.record_success();
                    summary.frames_captured += 1;
                    if !slot.publish(frame) {
                        log::debug!("frame consumer gone; acquisition stopping");
                        break;
                    }
                }
                Ok(None) => {
                    log::info!("video source reached end of stream");
                    summary.end_of_stream = true;
                    break;
                }
                Err(err) => {
                    summary.read_failures += 1;
                    log::warn!(
                        "frame read failed ({} in a row): {:#}",
                        budget.consecutive() + 1,
                        err
                    );
                    budget.record_failure(&err)?;
                    std::thread::sleep(budget.backoff());
                }
            }
        }
        Ok(summary)
    });
    AcquisitionHandle { join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{frame_slot, Frame, SlotRecv};
    use crate::ingest::SourceStats;
    use image::RgbImage;
    use std::collections::VecDeque;

    /// Replays a fixed list of read outcomes.
    struct ListSource {
        reads: VecDeque<Result<Option<u64>>>,
    }

    impl FrameSource for ListSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            match self.reads.pop_front() {
                Some(read) => read.map(|seq| seq.map(|s| Frame::new(RgbImage::new(2, 2), s))),
                None => Ok(None),
            }
        }

        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    #[test]
    fn budget_escalates_after_consecutive_failures() {
        let mut budget = FailureBudget::new(3);
        let err = anyhow!("timeout");
        assert!(budget.record_failure(&err).is_ok());
        assert!(budget.record_failure(&err).is_ok());
        budget.record_success();
        assert!(budget.record_failure(&err).is_ok());
        assert!(budget.record_failure(&err).is_ok());
        assert!(budget.record_failure(&err).is_err());
        assert_eq!(budget.total(), 5);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut budget = FailureBudget::new(100);
        assert_eq!(budget.backoff(), Duration::ZERO);
        let err = anyhow!("x");
        for _ in 0..40 {
            let _ = budget.record_failure(&err);
        }
        assert_eq!(budget.backoff(), MAX_BACKOFF);
    }

    #[test]
    fn stops_at_end_of_stream() -> Result<()> {
        let source = ListSource {
            reads: VecDeque::from(vec![Ok(Some(1)), Err(anyhow!("glitch")), Ok(Some(2))]),
        };
        let (tx, rx) = frame_slot();
        let handle = spawn_acquisition(
            Box::new(source),
            tx,
            ShutdownSignal::new(),
            FailureBudget::new(5),
        );
        let summary = handle
            .finish(Duration::from_secs(5))
            .ok_or_else(|| anyhow!("acquisition did not finish"))??;
        assert_eq!(summary.frames_captured, 2);
        assert_eq!(summary.read_failures, 1);
        assert!(summary.end_of_stream);

        // Latest frame is still waiting in the slot.
        match rx.recv_timeout(Duration::from_millis(10)) {
            SlotRecv::Frame(frame) => assert_eq!(frame.sequence, 2),
            other => panic!("expected frame, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn exhausted_budget_is_an_error() {
        let source = ListSource {
            reads: VecDeque::from(vec![Err(anyhow!("a")), Err(anyhow!("b"))]),
        };
        let (tx, _rx) = frame_slot();
        let handle = spawn_acquisition(
            Box::new(source),
            tx,
            ShutdownSignal::new(),
            FailureBudget::new(2),
        );
        let result = handle.finish(Duration::from_secs(5));
        assert!(matches!(result, Some(Err(_))));
    }
}
