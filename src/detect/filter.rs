//! Narrow a frame's raw detections to the tracked class inside the zone.

use serde::{Deserialize, Serialize};

use super::result::{ClassId, Detection};
use crate::geometry::{contains, Point, Polygon};

/// Representative point of a detection used for the containment test.
///
/// Fixed at startup. `BottomCenter` is the default: for livestock the
/// ground contact point decides which zone the animal stands in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    #[default]
    BottomCenter,
    Center,
}

impl Anchor {
    pub fn point(self, detection: &Detection) -> Point {
        match self {
            Anchor::BottomCenter => detection.bbox.bottom_center(),
            Anchor::Center => detection.bbox.center(),
        }
    }
}

/// Selection rules applied to every frame.
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    pub target_class: ClassId,
    pub anchor: Anchor,
    /// Detections of the target class below this confidence are ignored.
    pub min_confidence: f32,
}

impl DetectionFilter {
    pub fn new(target_class: ClassId) -> Self {
        Self {
            target_class,
            anchor: Anchor::default(),
            min_confidence: 0.0,
        }
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Keep detections that are the target class AND whose anchor lies in the zone.
    ///
    /// Confidence and bounding box pass through untouched. No target-class
    /// detections yields an empty vector, which is a normal outcome.
    pub fn apply(&self, detections: &[Detection], zone: &Polygon) -> Vec<Detection> {
        detections
            .iter()
            .filter(|d| d.class_id == self.target_class)
            .filter(|d| d.confidence >= self.min_confidence)
            .filter(|d| contains(zone, self.anchor.point(d)))
            .cloned()
            .collect()
    }
}

/// Free-function form with the default anchor and no confidence floor.
pub fn filter_detections(
    detections: &[Detection],
    target_class: ClassId,
    zone: &Polygon,
) -> Vec<Detection> {
    DetectionFilter::new(target_class).apply(detections, zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::geometry::ZoneSpec;

    const COW: ClassId = 19;
    const PERSON: ClassId = 0;

    fn zone() -> Polygon {
        ZoneSpec::default_zone().materialize(1280, 720)
    }

    fn det(class_id: ClassId, confidence: f32, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection::new(
            class_id,
            confidence,
            BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3),
        )
    }

    #[test]
    fn keeps_only_target_class_inside_zone() {
        let detections = vec![
            det(COW, 0.9, (100.0, 100.0, 300.0, 400.0)),
            det(PERSON, 0.95, (100.0, 100.0, 300.0, 400.0)),
            det(COW, 0.8, (1000.0, 100.0, 1200.0, 400.0)),
        ];
        let kept = filter_detections(&detections, COW, &zone());
        assert_eq!(kept, vec![detections[0].clone()]);
    }

    #[test]
    fn empty_when_target_class_absent() {
        let detections = vec![det(PERSON, 0.95, (100.0, 100.0, 300.0, 400.0))];
        assert!(filter_detections(&detections, COW, &zone()).is_empty());
        assert!(filter_detections(&[], COW, &zone()).is_empty());
    }

    #[test]
    fn anchor_choice_changes_containment() {
        // Zone right edge runs from (640,0) to (960,720): x~796 at y=350,
        // x~951 at y=700. The box center is outside, its base is inside.
        let d = det(COW, 0.9, (820.0, 0.0, 900.0, 700.0));
        let zone = zone();

        let bottom = DetectionFilter::new(COW).apply(std::slice::from_ref(&d), &zone);
        assert_eq!(bottom.len(), 1);

        let center = DetectionFilter::new(COW)
            .with_anchor(Anchor::Center)
            .apply(std::slice::from_ref(&d), &zone);
        assert!(center.is_empty());
    }

    #[test]
    fn min_confidence_drops_weak_detections() {
        let detections = vec![
            det(COW, 0.2, (100.0, 100.0, 300.0, 400.0)),
            det(COW, 0.7, (100.0, 100.0, 300.0, 400.0)),
        ];
        let kept = DetectionFilter::new(COW)
            .with_min_confidence(0.5)
            .apply(&detections, &zone());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.7);
    }
}
