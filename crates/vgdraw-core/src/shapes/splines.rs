//! Smooth curve through sampled points.

use super::{
    ShapeKind, coords_to_points, points_bounds, polygon_contains, polyline_intersects_rect,
};
use crate::storage::{ShapeReader, ShapeWriter, StorageError, StorageResult};
use kurbo::{Affine, BezPath, ParamCurveNearest, Point, Rect};
use std::any::Any;

const TENSION: f64 = 0.5;

/// A Catmull-Rom spline through its points, drawn as cubic beziers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplinesShape {
    pub points: Vec<Point>,
    pub closed: bool,
}

impl SplinesShape {
    pub const TYPE: &'static str = "splines";

    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points,
            closed: false,
        }
    }

    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn last(&self) -> Option<Point> {
        self.points.last().copied()
    }

    /// Control point pairs for the segment from `points[i]` to `points[i + 1]`.
    fn controls(&self, i: usize) -> (Point, Point) {
        let n = self.points.len();
        let at = |k: isize| -> Point {
            if self.closed {
                self.points[k.rem_euclid(n as isize) as usize]
            } else {
                self.points[k.clamp(0, n as isize - 1) as usize]
            }
        };
        let i = i as isize;
        let (p0, p1, p2, p3) = (at(i - 1), at(i), at(i + 1), at(i + 2));
        let t1 = (p2 - p0) * TENSION;
        let t2 = (p3 - p1) * TENSION;
        (p1 + t1 / 3.0, p2 - t2 / 3.0)
    }

    fn segment_count(&self) -> usize {
        match self.points.len() {
            0 | 1 => 0,
            n if self.closed => n,
            n => n - 1,
        }
    }
}

impl ShapeKind for SplinesShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        if self.points.len() < 2 {
            return points_bounds(&self.points);
        }
        kurbo::Shape::bounding_box(&self.to_path())
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        if self.points.len() == 1 {
            return self.points[0].distance(point) <= tolerance;
        }
        let tol_sq = tolerance * tolerance;
        self.to_path()
            .segments()
            .any(|seg| seg.nearest(point, 1e-6).distance_sq <= tol_sq)
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
        let Some(first) = self.points.first() else {
            return path;
        };
        path.move_to(*first);
        if self.points.len() == 2 && !self.closed {
            path.line_to(self.points[1]);
            return path;
        }
        let n = self.points.len();
        for i in 0..self.segment_count() {
            let (cp1, cp2) = self.controls(i);
            path.curve_to(cp1, cp2, self.points[(i + 1) % n]);
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
            return Err(StorageError::Serialization("splines without points".into()));
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
