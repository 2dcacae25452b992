//! ZoneGeometry - Slot polygons and overlap arithmetic
//!
//! ## Responsibilities
//!
//! - Validated simple polygons for parking slots
//! - Axis-aligned detection boxes
//! - Box/polygon overlap ratio (intersection area / box area)
//! - Point containment (slot picking from UI clicks)
//!
//! Polygons are validated once, at configuration-load time. Everything
//! computed here assumes a valid, non-self-intersecting polygon.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Area below which a polygon or box is treated as degenerate
const AREA_EPSILON: f64 = 1e-9;

/// 2D point in frame pixel coordinates.
///
/// Serialized as `[x, y]` so stored layouts stay compact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Axis-aligned bounding box (x1, y1) - (x2, y2)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// All four coordinates are finite numbers
    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Same box with corners ordered so that x1 <= x2 and y1 <= y2
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn intersects(&self, other: &BBox) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }
}

/// Simple (non-self-intersecting) polygon with cached area and bounds
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    points: Vec<Point>,
    area: f64,
    bounds: BBox,
}

impl Polygon {
    /// Build a polygon, rejecting anything the overlap arithmetic cannot handle:
    /// fewer than 3 vertices, non-finite coordinates, zero area, or crossing edges.
    pub fn new(points: Vec<Point>) -> Result<Self> {
        if points.len() < 3 {
            return Err(Error::Validation(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(Error::Validation(
                "polygon has non-finite coordinates".to_string(),
            ));
        }

        let area = shoelace_area(&points);
        if area <= AREA_EPSILON {
            return Err(Error::Validation("polygon has zero area".to_string()));
        }
        if has_crossing_edges(&points) {
            return Err(Error::Validation(
                "polygon edges intersect each other".to_string(),
            ));
        }

        let bounds = points.iter().fold(
            BBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |b, p| BBox::new(b.x1.min(p.x), b.y1.min(p.y), b.x2.max(p.x), b.y2.max(p.y)),
        );

        Ok(Self {
            points,
            area,
            bounds,
        })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    /// Even-odd ray casting
    pub fn contains(&self, p: Point) -> bool {
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Area of the intersection between this polygon and an axis-aligned box
    pub fn intersection_area(&self, bbox: &BBox) -> f64 {
        let bbox = bbox.normalized();
        if !self.bounds.intersects(&bbox) {
            return 0.0;
        }
        let clipped = clip_to_box(&self.points, &bbox);
        if clipped.len() < 3 {
            return 0.0;
        }
        shoelace_area(&clipped)
    }
}

/// A configured parking slot: 1-based id plus its validated outline
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: u32,
    pub polygon: Polygon,
}

impl Zone {
    pub fn new(id: u32, points: Vec<Point>) -> Result<Self> {
        let polygon = Polygon::new(points).map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("slot {}: {}", id, msg)),
            other => other,
        })?;
        Ok(Self { id, polygon })
    }

    /// Build zones from raw outlines, numbering them 1..=n in order
    pub fn from_outlines(outlines: &[Vec<Point>]) -> Result<Vec<Zone>> {
        outlines
            .iter()
            .enumerate()
            .map(|(idx, points)| Zone::new(idx as u32 + 1, points.clone()))
            .collect()
    }
}

/// Fraction of the detection box that lies inside the zone polygon, in [0, 1].
///
/// Normalized by the box area, not the zone area: the ratio answers
/// "how much of the vehicle is inside this slot".
pub fn overlap_ratio(zone: &Polygon, bbox: &BBox) -> f64 {
    if !bbox.is_finite() {
        return 0.0;
    }
    let bbox = bbox.normalized();
    let box_area = bbox.area();
    if box_area <= AREA_EPSILON {
        return 0.0;
    }
    (zone.intersection_area(&bbox) / box_area).clamp(0.0, 1.0)
}

fn shoelace_area(points: &[Point]) -> f64 {
    let n = points.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    (twice / 2.0).abs()
}

/// Sutherland-Hodgman clipping of an arbitrary simple polygon against a convex box.
/// Concave subjects may yield zero-width bridge edges; their shoelace area is still exact.
fn clip_to_box(subject: &[Point], bbox: &BBox) -> Vec<Point> {
    #[derive(Clone, Copy)]
    enum Edge {
        Left(f64),
        Right(f64),
        Bottom(f64),
        Top(f64),
    }

    fn inside(p: Point, edge: Edge) -> bool {
        match edge {
            Edge::Left(x) => p.x >= x,
            Edge::Right(x) => p.x <= x,
            Edge::Bottom(y) => p.y >= y,
            Edge::Top(y) => p.y <= y,
        }
    }

    fn crossing(a: Point, b: Point, edge: Edge) -> Point {
        match edge {
            Edge::Left(x) | Edge::Right(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Point::new(x, a.y + t * (b.y - a.y))
            }
            Edge::Bottom(y) | Edge::Top(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Point::new(a.x + t * (b.x - a.x), y)
            }
        }
    }

    let edges = [
        Edge::Left(bbox.x1),
        Edge::Right(bbox.x2),
        Edge::Bottom(bbox.y1),
        Edge::Top(bbox.y2),
    ];

    let mut output: Vec<Point> = subject.to_vec();
    for edge in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &curr in &input {
            match (inside(curr, edge), inside(prev, edge)) {
                (true, true) => output.push(curr),
                (true, false) => {
                    output.push(crossing(prev, curr, edge));
                    output.push(curr);
                }
                (false, true) => output.push(crossing(prev, curr, edge)),
                (false, false) => {}
            }
            prev = curr;
        }
    }
    output
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

fn has_crossing_edges(points: &[Point]) -> bool {
    let n = points.len();
    for i in 0..n {
        let (a1, a2) = (points[i], points[(i + 1) % n]);
        for j in (i + 1)..n {
            // adjacent edges share a vertex
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (b1, b2) = (points[j], points[(j + 1) % n]);
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}
