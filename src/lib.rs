//! Zone dwell watcher.
//!
//! Watches a live video stream, counts objects of one class inside a
//! configured polygon, measures how long the zone stays continuously
//! occupied and raises a single alert once that dwell exceeds a threshold.
//!
//! # Module Structure
//!
//! - `geometry`: zone polygons and point-in-polygon containment
//! - `detect`: detections, the per-frame filter and detector backends
//! - `occupancy`: the UNOCCUPIED/OCCUPIED episode state machine
//! - `alert`: once-per-episode debouncing and the alert payload
//! - `frame` / `ingest`: decoded frames, video sources, latest-frame-wins handoff
//! - `notify` / `annotate`: alert delivery and visual feedback
//! - `pipeline`: the per-frame driver tying everything together
//! - `config`: file + environment configuration for `dwelld`
//!
//! The dwell logic (`ZoneMonitor`) has no I/O and can be driven with
//! synthetic detections and instants.

use std::time::Instant;

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod notify;
pub mod occupancy;
pub mod pipeline;

pub use alert::{Alert, AlertDebouncer, AlertPolicy};
pub use config::DwellConfig;
pub use detect::{filter_detections, Anchor, BoundingBox, ClassId, Detection, DetectionFilter};
pub use frame::{frame_slot, Frame};
pub use geometry::{contains, Point, Polygon, ZoneSpec};
pub use ingest::{FrameSource, SourceConfig, VideoSource};
pub use occupancy::{EpisodeSummary, OccupancyState, OccupancyTracker, Transition};
pub use pipeline::{Pipeline, PipelineReport, ShutdownSignal, StopReason};

/// What one processed frame did to the zone.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    /// Target-class detections inside the zone.
    pub in_zone: usize,
    /// The detections behind `in_zone`, as kept by the filter.
    pub targets: Vec<Detection>,
    pub transition: Option<Transition>,
    pub alert: Option<Alert>,
}

/// Filter, tracker and debouncer for a single zone.
///
/// Owns the only occupancy state; feed it one frame at a time in capture
/// order.
#[derive(Debug)]
pub struct ZoneMonitor {
    zone: Polygon,
    filter: DetectionFilter,
    tracker: OccupancyTracker,
    debouncer: AlertDebouncer,
    context: String,
    label: String,
    alerts_fired: u64,
}

impl ZoneMonitor {
    pub fn new(zone: Polygon, filter: DetectionFilter, policy: AlertPolicy) -> Self {
        Self {
            zone,
            filter,
            tracker: OccupancyTracker::new(),
            debouncer: AlertDebouncer::new(policy),
            context: String::new(),
            label: String::new(),
            alerts_fired: 0,
        }
    }

    /// Stream identifier and class label copied into every alert.
    pub fn with_context(mut self, context: &str, label: &str) -> Self {
        self.context = context.to_string();
        self.label = label.to_string();
        self
    }

    pub fn from_config(cfg: &DwellConfig) -> Self {
        Self::new(cfg.zone_polygon(), cfg.detection_filter(), cfg.alert_policy())
            .with_context(cfg.alert_context(), &cfg.target.label)
    }

    pub fn zone(&self) -> &Polygon {
        &self.zone
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn alerts_fired(&self) -> u64 {
        self.alerts_fired
    }

    /// Apply one frame's detections, captured at `now`.
    pub fn observe(&mut self, detections: &[Detection], now: Instant) -> FrameOutcome {
        let targets = self.filter.apply(detections, &self.zone);
        let in_zone = targets.len();
        log::debug!("{} {} in zone", in_zone, self.label);

        let transition = self.tracker.update(in_zone, now);
        match &transition {
            Some(Transition::Started { .. }) => {
                log::info!("zone occupied: {} {} entered", in_zone, self.label);
            }
            Some(Transition::Ended(summary)) => {
                log::info!(
                    "zone clear: occupancy episode ended after {:.1}s ({} alert(s))",
                    summary.elapsed.as_secs_f64(),
                    summary.alerts_fired
                );
            }
            None => {}
        }

        let mut alert = None;
        if self.debouncer.should_fire(self.tracker.state_mut(), now) {
            let dwell = self.tracker.current_dwell(now).unwrap_or_default();
            let ordinal = self.tracker.state().alerts_fired();
            log::info!(
                "dwell alert #{}: {} {} in zone for {:.1}s",
                ordinal,
                in_zone,
                self.label,
                dwell.as_secs_f64()
            );
            self.alerts_fired += 1;
            alert = Some(Alert::new(&self.context, &self.label, in_zone, dwell, ordinal));
        }

        FrameOutcome {
            in_zone,
            targets,
            transition,
            alert,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
