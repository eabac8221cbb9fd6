//! End-to-end runs of the frame pipeline with a scripted detector and a
//! source that stamps frames with synthetic capture instants.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;

use dwell_watch::annotate::Annotator;
use dwell_watch::detect::{ScriptStep, ScriptedBackend, StubBackend};
use dwell_watch::ingest::{SourceConfig, SourceStats, SyntheticSource};
use dwell_watch::notify::Notifier;
use dwell_watch::pipeline::PipelineOptions;
use dwell_watch::{
    Alert, AlertPolicy, BoundingBox, Detection, DetectionFilter, Frame, FrameSource, Pipeline,
    PipelineReport, Polygon, ShutdownSignal, StopReason, ZoneMonitor, ZoneSpec,
};

const COW: u32 = 19;

enum Read {
    At(u64),
    Fail,
}

/// Frames captured at `t0 + ms`, in order.
struct TimedSource {
    t0: Instant,
    reads: VecDeque<Read>,
    sequence: u64,
    reachable: bool,
}

impl TimedSource {
    fn frames_at(ms: impl IntoIterator<Item = u64>) -> Self {
        Self::with_reads(ms.into_iter().map(Read::At).collect())
    }

    fn with_reads(reads: Vec<Read>) -> Self {
        Self {
            t0: Instant::now(),
            reads: reads.into(),
            sequence: 0,
            reachable: true,
        }
    }
}

impl FrameSource for TimedSource {
    fn connect(&mut self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.reads.pop_front() {
            Some(Read::At(ms)) => {
                self.sequence += 1;
                Ok(Some(Frame::captured_at(
                    RgbImage::new(4, 4),
                    self.sequence,
                    self.t0 + Duration::from_millis(ms),
                )))
            }
            Some(Read::Fail) => Err(anyhow!("decode error")),
            None => Ok(None),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            source: "test://timed".to_string(),
        }
    }
}

struct ChannelNotifier(Sender<Alert>);

impl Notifier for ChannelNotifier {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        self.0.send(alert.clone()).map_err(|_| anyhow!("receiver gone"))
    }
}

/// Counts delivery attempts and fails every one of them.
struct FailingNotifier(Sender<u32>);

impl Notifier for FailingNotifier {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn notify(&mut self, alert: &Alert) -> Result<()> {
        let _ = self.0.send(alert.ordinal);
        Err(anyhow!("mail relay unreachable"))
    }
}

/// Records `(boxes, in_zone)` for every annotated frame.
struct RecordingAnnotator(Sender<(usize, usize)>);

impl Annotator for RecordingAnnotator {
    fn annotate(
        &mut self,
        _frame: &Frame,
        detections: &[Detection],
        _zone: &Polygon,
        in_zone: usize,
    ) -> Result<()> {
        let _ = self.0.send((detections.len(), in_zone));
        Ok(())
    }
}

fn cow_in_zone() -> Detection {
    Detection::new(COW, 0.9, BoundingBox::new(100.0, 200.0, 300.0, 500.0))
}

fn cow_outside_zone() -> Detection {
    Detection::new(COW, 0.9, BoundingBox::new(1100.0, 200.0, 1250.0, 500.0))
}

fn person_in_zone() -> Detection {
    Detection::new(0, 0.8, BoundingBox::new(100.0, 200.0, 300.0, 500.0))
}

fn inline_options() -> PipelineOptions {
    PipelineOptions {
        threaded: false,
        max_consecutive_failures: 3,
        shutdown_timeout: Duration::from_secs(5),
        expected_size: None,
    }
}

fn monitor() -> ZoneMonitor {
    ZoneMonitor::new(
        ZoneSpec::default_zone().materialize(1280, 720),
        DetectionFilter::new(COW),
        AlertPolicy::once_after(Duration::from_secs(5)),
    )
    .with_context("test://timed", "cattle")
}

fn pipeline(script: Vec<ScriptStep>) -> (Pipeline, Receiver<Alert>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let pipeline = Pipeline::new(
        monitor(),
        Box::new(ScriptedBackend::new(script)),
        Box::new(ChannelNotifier(tx)),
    )
    .with_options(inline_options());
    (pipeline, rx)
}

fn run(pipeline: Pipeline, source: TimedSource) -> Result<PipelineReport> {
    pipeline.run(Box::new(source), &ShutdownSignal::new())
}

#[test]
fn short_occupancy_ends_without_alert() -> Result<()> {
    let (pipeline, alerts) = pipeline(vec![
        ScriptStep::detections(vec![cow_in_zone()], 5),
        ScriptStep::empty(1),
    ]);
    let source = TimedSource::frames_at([0, 1_225, 2_450, 3_675, 4_900, 5_000]);

    let report = run(pipeline, source)?;
    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.frames_processed, 6);
    assert_eq!(report.episodes_completed, 1);
    assert_eq!(report.alerts_fired, 0);
    assert!(alerts.try_recv().is_err());
    Ok(())
}

#[test]
fn continuous_occupancy_alerts_exactly_once() -> Result<()> {
    let (pipeline, alerts) = pipeline(vec![ScriptStep::detections(vec![cow_in_zone()], 61)]);
    let source = TimedSource::frames_at((0..=6_000).step_by(100));

    let report = run(pipeline, source)?;
    assert_eq!(report.alerts_fired, 1);
    assert_eq!(report.dispatch.sent, 1);
    assert!(report.dispatch.drained);

    let alert = alerts.try_recv()?;
    assert_eq!(alert.dwell(), Duration::from_millis(5_100));
    assert_eq!(alert.context, "test://timed");
    assert_eq!(alert.ordinal, 1);
    assert!(alerts.try_recv().is_err());
    Ok(())
}

#[test]
fn rearms_after_zone_clears() -> Result<()> {
    let (pipeline, alerts) = pipeline(vec![
        ScriptStep::detections(vec![cow_in_zone()], 8),
        ScriptStep::empty(2),
        ScriptStep::detections(vec![cow_in_zone(), cow_in_zone()], 8),
    ]);
    let frames = (0..18).map(|i| i * 1_000);
    let report = run(pipeline, TimedSource::frames_at(frames))?;

    assert_eq!(report.alerts_fired, 2);
    assert_eq!(report.episodes_completed, 1);
    let received: Vec<Alert> = alerts.try_iter().collect();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].occupancy, 2);
    Ok(())
}

#[test]
fn absent_target_class_never_alerts() -> Result<()> {
    let (pipeline, alerts) = pipeline(vec![ScriptStep::detections(vec![person_in_zone()], 100)]);
    let report = run(pipeline, TimedSource::frames_at((0..100).map(|i| i * 250)))?;

    assert_eq!(report.frames_processed, 100);
    assert_eq!(report.episodes_completed, 0);
    assert_eq!(report.alerts_fired, 0);
    assert!(alerts.try_recv().is_err());
    Ok(())
}

#[test]
fn detector_failure_skips_frame_without_ending_episode() -> Result<()> {
    let (pipeline, alerts) = pipeline(vec![
        ScriptStep::detections(vec![cow_in_zone()], 3),
        ScriptStep::failure("inference crashed"),
        ScriptStep::detections(vec![cow_in_zone()], 4),
    ]);
    let report = run(pipeline, TimedSource::frames_at((0..8).map(|i| i * 1_000)))?;

    assert_eq!(report.frames_skipped, 1);
    assert_eq!(report.frames_processed, 7);
    // One continuous episode from t=0; the failed frame neither ended nor extended it.
    assert_eq!(report.episodes_completed, 0);
    assert_eq!(report.alerts_fired, 1);
    assert_eq!(alerts.try_recv()?.dwell(), Duration::from_secs(6));
    Ok(())
}

#[test]
fn transient_read_failures_are_tolerated() -> Result<()> {
    let (pipeline, _alerts) = pipeline(Vec::new());
    let source = TimedSource::with_reads(vec![
        Read::At(0),
        Read::Fail,
        Read::Fail,
        Read::At(100),
        Read::Fail,
        Read::At(200),
    ]);
    let report = run(pipeline, source)?;
    assert_eq!(report.read_failures, 3);
    assert_eq!(report.frames_processed, 3);
    Ok(())
}

#[test]
fn persistent_read_failures_are_fatal() {
    let (pipeline, _alerts) = pipeline(Vec::new());
    let source = TimedSource::with_reads(vec![Read::At(0), Read::Fail, Read::Fail, Read::Fail]);
    assert!(run(pipeline, source).is_err());
}

#[test]
fn unreachable_source_is_reported() {
    let (pipeline, _alerts) = pipeline(Vec::new());
    let mut source = TimedSource::frames_at([0]);
    source.reachable = false;

    let err = run(pipeline, source).expect_err("connect must fail");
    assert!(format!("{:#}", err).contains("video source unavailable: test://timed"));
}

#[test]
fn shutdown_before_first_frame() -> Result<()> {
    let (pipeline, _alerts) = pipeline(Vec::new());
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();

    let report = pipeline.run(Box::new(TimedSource::frames_at([0, 100])), &shutdown)?;
    assert_eq!(report.stop_reason, StopReason::Shutdown);
    assert_eq!(report.frames_processed, 0);
    Ok(())
}

#[test]
fn threaded_mode_accounts_for_every_frame() -> Result<()> {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let monitor = ZoneMonitor::new(
        ZoneSpec::default_zone().materialize(64, 48),
        DetectionFilter::new(COW),
        AlertPolicy::once_after(Duration::from_secs(5)),
    );
    let pipeline = Pipeline::new(
        monitor,
        Box::new(StubBackend::new()),
        Box::new(ChannelNotifier(tx)),
    )
    .with_options(PipelineOptions {
        threaded: true,
        ..inline_options()
    });
    let source = SyntheticSource::new(SourceConfig {
        url: "stub://barn?frames=20".to_string(),
        width: 64,
        height: 48,
        target_fps: 0,
    })?;

    let report = pipeline.run(Box::new(source), &ShutdownSignal::new())?;
    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.frames_processed + report.frames_dropped, 20);
    assert_eq!(report.alerts_fired, 0);
    Ok(())
}

#[test]
fn annotator_sees_only_boxes_inside_the_zone() -> Result<()> {
    let (boxes_tx, boxes_rx) = crossbeam_channel::unbounded();
    let (pipeline, _alerts) = pipeline(vec![
        ScriptStep::detections(vec![cow_outside_zone()], 1),
        ScriptStep::detections(vec![cow_in_zone(), cow_outside_zone(), person_in_zone()], 1),
    ]);
    let pipeline = pipeline.with_annotator(Box::new(RecordingAnnotator(boxes_tx)));

    run(pipeline, TimedSource::frames_at([0, 100]))?;
    assert_eq!(boxes_rx.try_iter().collect::<Vec<_>>(), vec![(0, 0), (1, 1)]);
    Ok(())
}

#[test]
fn failing_notifier_leaves_tracking_untouched() -> Result<()> {
    let script = || {
        vec![
            ScriptStep::detections(vec![cow_in_zone()], 61),
            ScriptStep::empty(1),
        ]
    };
    let frames = || (0..=6_100).step_by(100);

    let (passing, delivered) = pipeline(script());
    let baseline = run(passing, TimedSource::frames_at(frames()))?;
    assert_eq!(delivered.try_iter().count(), 1);

    let (attempts_tx, attempts_rx) = crossbeam_channel::unbounded();
    let failing = Pipeline::new(
        monitor(),
        Box::new(ScriptedBackend::new(script())),
        Box::new(FailingNotifier(attempts_tx)),
    )
    .with_options(inline_options());
    let report = run(failing, TimedSource::frames_at(frames()))?;

    assert_eq!(attempts_rx.try_iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(report.dispatch.failed, 1);
    assert_eq!(report.dispatch.sent, 0);
    assert_eq!(report.alerts_fired, 1);
    assert_eq!(report.frames_processed, baseline.frames_processed);
    assert_eq!(report.episodes_completed, baseline.episodes_completed);
    assert_eq!(report.episodes_completed, 1);
    assert_eq!(report.alerts_fired, baseline.alerts_fired);
    Ok(())
}
