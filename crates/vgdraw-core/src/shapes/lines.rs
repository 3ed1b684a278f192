//! Polyline / polygon.

use super::{
    ShapeKind, coords_to_points, point_to_polyline_dist, points_bounds, polygon_contains,
    polyline_intersects_rect,
};
use crate::storage::{ShapeReader, ShapeWriter, StorageError, StorageResult};
use kurbo::{Affine, BezPath, Point, Rect};
use std::any::Any;

/// Connected straight segments, optionally closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinesShape {
    pub points: Vec<Point>,
    pub closed: bool,
}

impl LinesShape {
    pub const TYPE: &'static str = "lines";

    pub fn new(points: Vec<Point>, closed: bool) -> Self {
        Self { points, closed }
    }

    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Drop the last point, keeping at least one.
    pub fn remove_last(&mut self) -> Option<Point> {
        if self.points.len() > 1 {
            self.points.pop()
        } else {
            None
        }
    }

    pub fn last(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Whether `self` only appends points to `older`.
    pub fn is_increment_from(&self, older: &LinesShape) -> bool {
        self.closed == older.closed
            && self.points.len() > older.points.len()
            && self.points[..older.points.len()] == older.points[..]
    }

    fn outline(&self) -> Vec<Point> {
        let mut pts = self.points.clone();
        if self.closed && pts.len() > 2 {
            pts.push(pts[0]);
        }
        pts
    }
}

impl ShapeKind for LinesShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        points_bounds(&self.points)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        point_to_polyline_dist(point, &self.outline()) <= tolerance
    }

    fn contains(&self, point: Point) -> bool {
        polygon_contains(&self.points, point)
    }

    fn hit_test_box(&self, rect: Rect) -> bool {
        polyline_intersects_rect(&self.points, self.closed, rect)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let Some((first, rest)) = self.points.split_first() else {
            return path;
        };
        path.move_to(*first);
        for p in rest {
            path.line_to(*p);
        }
        if self.closed {
            path.close_path();
        }
        path
    }

    fn transform(&mut self, affine: Affine) {
        for p in &mut self.points {
            *p = affine * *p;
        }
    }

    fn point_count(&self) -> usize {
        self.points.len()
    }

    fn point(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    fn set_point(&mut self, index: usize, point: Point) -> bool {
        match self.points.get_mut(index) {
            Some(p) => {
                *p = point;
                true
            }
            None => false,
        }
    }

    fn save(&self, w: &mut dyn ShapeWriter) {
        let coords: Vec<f64> = self.points.iter().flat_map(|p| [p.x, p.y]).collect();
        w.write_float_array("points", &coords);
        w.write_bool("closed", self.closed);
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
        let points = coords_to_points(&r.read_float_array("points"));
        if points.is_empty() {
            return Err(StorageError::Serialization("lines without points".into()));
        }
        self.points = points;
        self.closed = r.read_bool("closed", false);
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
