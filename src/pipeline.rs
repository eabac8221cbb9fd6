//! Per-frame driver.
//!
//! For every frame: detect, filter against the zone, update occupancy, check
//! the debouncer, hand any alert to the dispatcher and annotate. Frames come
//! either from a background acquisition thread through the depth-1
//! latest-frame-wins slot (`threaded`) or straight from the source on the
//! processing thread (inline replays and tests).
//!
//! Dwell is measured against each frame's capture instant, so detector
//! latency never stretches or shrinks an episode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::annotate::{open_annotator, Annotator, LogAnnotator};
use crate::config::DwellConfig;
use crate::detect::{open_backend, DetectorBackend};
use crate::frame::{frame_slot, Frame, SlotRecv};
use crate::ingest::{spawn_acquisition, FailureBudget, FrameSource};
use crate::notify::{open_notifier, DispatchStats, NotificationDispatcher, Notifier};
use crate::ZoneMonitor;

const RECV_POLL: Duration = Duration::from_millis(100);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Cooperative stop flag shared with the Ctrl-C handler and worker threads.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    EndOfStream,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub frames_processed: u64,
    /// Frames whose detection failed; occupancy was left untouched.
    pub frames_skipped: u64,
    /// Stale frames replaced in the slot before processing reached them.
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub episodes_completed: u64,
    pub alerts_fired: u64,
    pub dispatch: DispatchStats,
    pub stop_reason: StopReason,
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub threaded: bool,
    pub max_consecutive_failures: u32,
    pub shutdown_timeout: Duration,
    /// Configured capture size; frames of another size are logged once.
    pub expected_size: Option<(u32, u32)>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threaded: true,
            max_consecutive_failures: 30,
            shutdown_timeout: Duration::from_secs(5),
            expected_size: None,
        }
    }
}

#[derive(Debug, Default)]
struct RunCounters {
    frames_processed: u64,
    frames_skipped: u64,
    frames_dropped: u64,
    read_failures: u64,
    size_warned: bool,
}

pub struct Pipeline {
    monitor: ZoneMonitor,
    detector: Box<dyn DetectorBackend>,
    dispatcher: NotificationDispatcher,
    annotator: Box<dyn Annotator>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        monitor: ZoneMonitor,
        detector: Box<dyn DetectorBackend>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            monitor,
            detector,
            dispatcher: NotificationDispatcher::spawn(notifier),
            annotator: Box::new(LogAnnotator),
            options: PipelineOptions::default(),
        }
    }

    pub fn from_config(cfg: &DwellConfig) -> Result<Self> {
        let detector = open_backend(&cfg.detector).context("failed to open detector backend")?;
        let notifier = open_notifier(&cfg.notifier).context("failed to open notifier")?;
        let options = PipelineOptions {
            threaded: cfg.source.threaded,
            max_consecutive_failures: cfg.source.max_consecutive_failures,
            shutdown_timeout: cfg.notifier.shutdown_timeout,
            expected_size: Some((cfg.source.width, cfg.source.height)),
        };
        let annotator = open_annotator(&cfg.annotator).context("failed to open annotator")?;
        Ok(Self::new(ZoneMonitor::from_config(cfg), detector, notifier)
            .with_annotator(annotator)
            .with_options(options))
    }

    pub fn with_annotator(mut self, annotator: Box<dyn Annotator>) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn monitor(&self) -> &ZoneMonitor {
        &self.monitor
    }

    /// Connect the source and process frames until end of stream or shutdown.
    pub fn run(
        mut self,
        mut source: Box<dyn FrameSource>,
        shutdown: &ShutdownSignal,
    ) -> Result<PipelineReport> {
        let address = source.stats().source;
        source
            .connect()
            .with_context(|| format!("video source unavailable: {}", address))?;
        self.detector
            .warm_up()
            .with_context(|| format!("detector {} failed to warm up", self.detector.name()))?;

        log::info!(
            "pipeline running: source={} detector={} notifier={} mode={}",
            address,
            self.detector.name(),
            self.dispatcher.transport(),
            if self.options.threaded { "threaded" } else { "inline" }
        );

        let mut counters = RunCounters::default();
        let outcome = if self.options.threaded {
            self.run_threaded(source, shutdown, &mut counters)
        } else {
            self.run_inline(source, shutdown, &mut counters)
        };

        let episodes_completed = self.monitor.tracker().episodes_completed();
        let alerts_fired = self.monitor.alerts_fired();
        let dispatch = self.dispatcher.shutdown(self.options.shutdown_timeout);
        let stop_reason = outcome?;

        let report = PipelineReport {
            frames_processed: counters.frames_processed,
            frames_skipped: counters.frames_skipped,
            frames_dropped: counters.frames_dropped,
            read_failures: counters.read_failures,
            episodes_completed,
            alerts_fired,
            dispatch,
            stop_reason,
        };
        log::info!(
            "pipeline stopped ({:?}): processed={} skipped={} dropped={} read_failures={} episodes={} alerts={} delivered={} failed={}",
            report.stop_reason,
            report.frames_processed,
            report.frames_skipped,
            report.frames_dropped,
            report.read_failures,
            report.episodes_completed,
            report.alerts_fired,
            report.dispatch.sent,
            report.dispatch.failed
        );
        Ok(report)
    }

    fn run_inline(
        &mut self,
        mut source: Box<dyn FrameSource>,
        shutdown: &ShutdownSignal,
        counters: &mut RunCounters,
    ) -> Result<StopReason> {
        let mut budget = FailureBudget::new(self.options.max_consecutive_failures);
        let mut last_health_log = Instant::now();

        let reason = loop {
            if shutdown.is_triggered() {
                break StopReason::Shutdown;
            }
            match source.next_frame() {
                Ok(Some(frame)) => {
                    budget.record_success();
                    self.process(frame, counters);
                }
                Ok(None) => break StopReason::EndOfStream,
                Err(err) => {
                    counters.read_failures += 1;
                    log::warn!("frame read failed: {:#}", err);
                    budget.record_failure(&err)?;
                    std::thread::sleep(budget.backoff());
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = source.stats();
                log::info!(
                    "source health={} captured={} processed={} skipped={} url={}",
                    source.is_healthy(),
                    stats.frames_captured,
                    counters.frames_processed,
                    counters.frames_skipped,
                    stats.source
                );
                last_health_log = Instant::now();
            }
        };
        Ok(reason)
    }

    fn run_threaded(
        &mut self,
        source: Box<dyn FrameSource>,
        shutdown: &ShutdownSignal,
        counters: &mut RunCounters,
    ) -> Result<StopReason> {
        let (tx, rx) = frame_slot();
        let acquisition = spawn_acquisition(
            source,
            tx,
            shutdown.clone(),
            FailureBudget::new(self.options.max_consecutive_failures),
        );
        let mut last_health_log = Instant::now();

        let reason = loop {
            if shutdown.is_triggered() {
                break StopReason::Shutdown;
            }
            match rx.recv_timeout(RECV_POLL) {
                SlotRecv::Frame(frame) => self.process(frame, counters),
                SlotRecv::Timeout => {}
                SlotRecv::Closed => break StopReason::EndOfStream,
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "acquisition alive={} processed={} dropped={} skipped={}",
                    !acquisition.is_finished(),
                    counters.frames_processed,
                    rx.dropped(),
                    counters.frames_skipped
                );
                last_health_log = Instant::now();
            }
        };

        counters.frames_dropped = rx.dropped();
        drop(rx);

        match acquisition.finish(self.options.shutdown_timeout) {
            Some(Ok(summary)) => {
                counters.read_failures = summary.read_failures;
                Ok(reason)
            }
            Some(Err(err)) => Err(err.context("frame acquisition failed")),
            None => Ok(reason),
        }
    }

    fn process(&mut self, frame: Frame, counters: &mut RunCounters) {
        self.check_frame_size(&frame, counters);

        let detections = match self.detector.detect(&frame.image) {
            Ok(detections) => detections,
            Err(err) => {
                counters.frames_skipped += 1;
                log::warn!(
                    "detector {} failed on frame {}; skipping: {:#}",
                    self.detector.name(),
                    frame.sequence,
                    err
                );
                return;
            }
        };
        counters.frames_processed += 1;

        let mut outcome = self.monitor.observe(&detections, frame.captured_at);
        if let Some(alert) = outcome.alert.take() {
            self.dispatcher.dispatch(alert);
        }

        if let Err(err) = self.annotator.annotate(
            &frame,
            &outcome.targets,
            self.monitor.zone(),
            outcome.in_zone,
        ) {
            log::warn!("annotation failed for frame {}: {:#}", frame.sequence, err);
        }
    }

    fn check_frame_size(&self, frame: &Frame, counters: &mut RunCounters) {
        if counters.size_warned {
            return;
        }
        if let Some((width, height)) = self.options.expected_size {
            if (frame.width(), frame.height()) != (width, height) {
                log::warn!(
                    "source delivers {}x{} frames but the zone was scaled for {}x{}",
                    frame.width(),
                    frame.height(),
                    width,
                    height
                );
                counters.size_warned = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_is_shared() {
        let signal = ShutdownSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_triggered());
        handle.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn default_options_are_threaded() {
        let options = PipelineOptions::default();
        assert!(options.threaded);
        assert_eq!(options.max_consecutive_failures, 30);
        assert_eq!(options.expected_size, None);
    }
}
