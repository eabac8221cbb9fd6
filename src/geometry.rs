//! Zone geometry.
//!
//! The monitored zone is configured as a polygon in fractional frame
//! coordinates (`ZoneSpec`) and materialized once into absolute pixel
//! coordinates (`Polygon`) for the configured capture resolution.
//!
//! Containment policy: a point lying exactly on an edge or a vertex is
//! INSIDE the polygon. Everything else is decided by an even-odd ray cast
//! with half-open edge crossings, so the answer is deterministic for the
//! same polygon and point.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A 2-D point in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Simple polygon in absolute pixel coordinates. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Polygons with fewer than three vertices enclose nothing.
    pub fn is_degenerate(&self) -> bool {
        self.vertices.len() < 3
    }

    /// Iterate edges as `(from, to)` pairs, closing the ring.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }

    pub fn contains(&self, point: Point) -> bool {
        contains(self, point)
    }
}

/// Point-in-polygon test. Boundary points (edges and vertices) count as inside.
pub fn contains(polygon: &Polygon, point: Point) -> bool {
    if polygon.is_degenerate() || !point.x.is_finite() || !point.y.is_finite() {
        return false;
    }

    if polygon.edges().any(|(a, b)| on_segment(a, b, point)) {
        return true;
    }

    let mut inside = false;
    for (a, b) in polygon.edges() {
        // Half-open rule: an edge counts when exactly one endpoint is above the ray.
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross != 0.0 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

// ----------------------------------------------------------------------------
// ZoneSpec: fractional zone as configured
// ----------------------------------------------------------------------------

/// Zone polygon expressed as fractions of frame width/height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneSpec {
    pub vertices: Vec<[f64; 2]>,
}

impl ZoneSpec {
    pub fn new(vertices: Vec<[f64; 2]>) -> Self {
        Self { vertices }
    }

    /// Livestock zone used by the original deployment: a quadrilateral on the
    /// left half of the frame, widening towards the bottom edge.
    pub fn default_zone() -> Self {
        Self::new(vec![[0.0, 0.0], [0.5, 0.0], [0.75, 1.0], [0.0, 1.0]])
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() < 3 {
            return Err(anyhow!(
                "zone polygon needs at least 3 vertices, got {}",
                self.vertices.len()
            ));
        }
        for (i, [x, y]) in self.vertices.iter().enumerate() {
            if !x.is_finite() || !y.is_finite() {
                return Err(anyhow!("zone vertex {} is not finite", i));
            }
            if !(0.0..=1.0).contains(x) || !(0.0..=1.0).contains(y) {
                return Err(anyhow!(
                    "zone vertex {} ({}, {}) must lie within [0, 1]",
                    i,
                    x,
                    y
                ));
            }
        }
        Ok(())
    }

    /// Scale to absolute pixels for the given resolution, truncating toward zero.
    pub fn materialize(&self, width: u32, height: u32) -> Polygon {
        let vertices = self
            .vertices
            .iter()
            .map(|[x, y]| {
                Point::new(
                    (x * width as f64).trunc(),
                    (y * height as f64).trunc(),
                )
            })
            .collect();
        Polygon::new(vertices)
    }

    /// Parse `x,y;x,y;...` as used by the `DWELL_ZONE` environment override.
    pub fn parse(value: &str) -> Result<Self> {
        let mut vertices = Vec::new();
        for pair in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("zone vertex '{}' must be 'x,y'", pair))?;
            let x: f64 = x
                .trim()
                .parse()
                .map_err(|_| anyhow!("zone vertex '{}' has a non-numeric x", pair))?;
            let y: f64 = y
                .trim()
                .parse()
                .map_err(|_| anyhow!("zone vertex '{}' has a non-numeric y", pair))?;
            vertices.push([x, y]);
        }
        Ok(Self::new(vertices))
    }
}

impl Default for ZoneSpec {
    fn default() -> Self {
        Self::default_zone()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
