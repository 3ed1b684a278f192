//! Straight line segment.

use super::{ShapeKind, coords_to_points, point_to_segment_dist, segment_intersects_rect};
use crate::storage::{ShapeReader, StorageError, StorageResult};
use kurbo::{Affine, BezPath, Point, Rect};
use std::any::Any;

/// A line segment between two points.
#[derive(Debug, Clone, PartialEq)]
pub struct LineShape {
    pub start: Point,
    pub end: Point,
}

impl LineShape {
    pub const TYPE: &'static str = "line";

    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    pub fn midpoint(&self) -> Point {
        self.start.midpoint(self.end)
    }
}

impl Default for LineShape {
    fn default() -> Self {
        Self::new(Point::ZERO, Point::ZERO)
    }
}

impl ShapeKind for LineShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        Rect::from_points(self.start, self.end)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        point_to_segment_dist(point, self.start, self.end) <= tolerance
    }

    fn hit_test_box(&self, rect: Rect) -> bool {
        segment_intersects_rect(self.start, self.end, rect)
    }

    fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        path.move_to(self.start);
        path.line_to(self.end);
        path
    }

    fn transform(&mut self, affine: Affine) {
        self.start = affine * self.start;
        self.end = affine * self.end;
    }

    fn point_count(&self) -> usize {
        2
    }

    fn point(&self, index: usize) -> Option<Point> {
        match index {
            0 => Some(self.start),
            1 => Some(self.end),
            _ => None,
        }
    }

    fn set_point(&mut self, index: usize, point: Point) -> bool {
        match index {
            0 => self.start = point,
            1 => self.end = point,
            _ => return false,
        }
        true
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
        let points = coords_to_points(&r.read_float_array("points"));
        let [start, end] = points[..] else {
            return Err(StorageError::Serialization(format!(
                "line needs 2 points, got {}",
                points.len()
            )));
        };
        self.start = start;
        self.end = end;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ShapeKind> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
