//! Visual feedback for processed frames.
//!
//! Annotators see each processed frame together with its detections and the
//! zone. Failures are logged by the caller and never affect occupancy.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};

use crate::config::{AnnotatorKind, AnnotatorSettings};
use crate::detect::Detection;
use crate::frame::Frame;
use crate::geometry::{Point, Polygon};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const ZONE_IDLE_COLOR: [u8; 3] = [255, 255, 255];
const ZONE_OCCUPIED_COLOR: [u8; 3] = [255, 0, 0];

pub trait Annotator: Send {
    /// `detections` are the target-class detections inside the zone, so
    /// `in_zone == detections.len()`.
    fn annotate(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        zone: &Polygon,
        in_zone: usize,
    ) -> Result<()>;
}

/// Per-frame count at debug level.
#[derive(Debug, Default)]
pub struct LogAnnotator;

impl Annotator for LogAnnotator {
    fn annotate(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        _zone: &Polygon,
        in_zone: usize,
    ) -> Result<()> {
        log::debug!(
            "frame {}: {} in zone, {} box(es)",
            frame.sequence,
            in_zone,
            detections.len()
        );
        Ok(())
    }
}

/// Writes an overlay JPEG (boxes plus zone outline) every `every_n_frames`.
///
/// The file is replaced in place, so it always shows a recent frame.
#[derive(Debug)]
pub struct SnapshotAnnotator {
    path: PathBuf,
    every_n_frames: u32,
    seen: u64,
    written: u64,
}

impl SnapshotAnnotator {
    pub fn new(path: impl Into<PathBuf>, every_n_frames: u32) -> Self {
        Self {
            path: path.into(),
            every_n_frames: every_n_frames.max(1),
            seen: 0,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Annotator for SnapshotAnnotator {
    fn annotate(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        zone: &Polygon,
        in_zone: usize,
    ) -> Result<()> {
        self.seen += 1;
        if (self.seen - 1) % self.every_n_frames as u64 != 0 {
            return Ok(());
        }

        let mut canvas = frame.image.clone();
        render_overlay(&mut canvas, detections, zone, in_zone);

        let tmp = self.path.with_extension("tmp");
        canvas
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to publish snapshot {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }
}

pub fn open_annotator(settings: &AnnotatorSettings) -> Result<Box<dyn Annotator>> {
    match settings.kind {
        AnnotatorKind::Log => Ok(Box::new(LogAnnotator)),
        AnnotatorKind::Snapshot => {
            let path = settings
                .snapshot_path
                .clone()
                .ok_or_else(|| anyhow!("snapshot annotator requires annotator.snapshot_path"))?;
            Ok(Box::new(SnapshotAnnotator::new(path, settings.every_n_frames)))
        }
    }
}

// ----------------------------------------------------------------------------
// Drawing
// ----------------------------------------------------------------------------

pub fn render_overlay(canvas: &mut RgbImage, detections: &[Detection], zone: &Polygon, in_zone: usize) {
    let zone_color = if in_zone > 0 {
        ZONE_OCCUPIED_COLOR
    } else {
        ZONE_IDLE_COLOR
    };
    for (a, b) in zone.edges() {
        draw_line(canvas, a, b, zone_color);
    }
    for det in detections {
        let b = &det.bbox;
        draw_rect(canvas, b.x1 as i32, b.y1 as i32, b.x2 as i32, b.y2 as i32, BOX_COLOR);
    }
}

fn draw_rect(canvas: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: [u8; 3]) {
    for x in x1..=x2 {
        set_pixel_safe(canvas, x, y1, color);
        set_pixel_safe(canvas, x, y2, color);
    }
    for y in y1..=y2 {
        set_pixel_safe(canvas, x1, y, color);
        set_pixel_safe(canvas, x2, y, color);
    }
}

/// Bresenham line between two pixel points.
fn draw_line(canvas: &mut RgbImage, from: Point, to: Point, color: [u8; 3]) {
    let (mut x, mut y) = (from.x as i64, from.y as i64);
    let (x_end, y_end) = (to.x as i64, to.y as i64);
    let dx = (x_end - x).abs();
    let dy = -(y_end - y).abs();
    let sx = if x < x_end { 1 } else { -1 };
    let sy = if y < y_end { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        set_pixel_safe(canvas, x as i32, y as i32, color);
        if x == x_end && y == y_end {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn set_pixel_safe(canvas: &mut RgbImage, x: i32, y: i32, color: [u8; 3]) {
    if x >= 0 && y >= 0 && x < canvas.width() as i32 && y < canvas.height() as i32 {
        canvas.put_pixel(x as u32, y as u32, Rgb(color));
    }
}
