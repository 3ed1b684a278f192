//! Rectangle shape.

use super::{
    ShapeKind, coords_to_points, point_to_polyline_dist, points_bounds, polygon_contains,
    polyline_intersects_rect,
};
use crate::storage::{ShapeReader, StorageError, StorageResult};
use kurbo::{Affine, BezPath, Point, Rect};
use std::any::Any;

/// A rectangle stored as four corners so it survives rotation.
///
/// Corners run clockwise from the top-left of the unrotated rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct RectShape {
    corners: [Point; 4],
}

impl RectShape {
    pub const TYPE: &'static str = "rect";

    pub fn new(rect: Rect) -> Self {
        let r = rect.abs();
        Self {
            corners: [
                Point::new(r.x0, r.y0),
                Point::new(r.x1, r.y0),
                Point::new(r.x1, r.y1),
                Point::new(r.x0, r.y1),
            ],
        }
    }

    /// Rectangle spanning two opposite corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(Rect::from_points(a, b))
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn is_axis_aligned(&self) -> bool {
        let [a, b, c, d] = self.corners;
        (a.y - b.y).abs() < 1e-9
            && (b.x - c.x).abs() < 1e-9
            && (c.y - d.y).abs() < 1e-9
            && (d.x - a.x).abs() < 1e-9
    }

    pub fn width(&self) -> f64 {
        self.corners[0].distance(self.corners[1])
    }

    pub fn height(&self) -> f64 {
        self.corners[1].distance(self.corners[2])
    }

    fn outline(&self) -> [Point; 5] {
        let [a, b, c, d] = self.corners;
        [a, b, c, d, a]
    }
}

impl Default for RectShape {
    fn default() -> Self {
        Self::new(Rect::ZERO)
    }
}

impl ShapeKind for RectShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        points_bounds(&self.corners)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        point_to_polyline_dist(point, &self.outline()) <= tolerance
    }

    fn contains(&self, point: Point) -> bool {
        polygon_contains(&self.corners, point)
    }

    fn hit_test_box(&self, rect: Rect) -> bool {
        polyline_intersects_rect(&self.corners, true, rect)
            || polygon_contains(&self.corners, rect.center())
    }

    fn is_closed(&self) -> bool {
        true
    }

    fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        path.move_to(self.corners[0]);
        for p in &self.corners[1..] {
            path.line_to(*p);
        }
        path.close_path();
        path
    }

    fn transform(&mut self, affine: Affine) {
        for p in &mut self.corners {
            *p = affine * *p;
        }
    }

    fn point_count(&self) -> usize {
        4
    }

    fn point(&self, index: usize) -> Option<Point> {
        self.corners.get(index).copied()
    }

    /// Dragging a corner keeps the opposite corner fixed. A rotated
    /// rectangle only moves the dragged corner.
    fn set_point(&mut self, index: usize, point: Point) -> bool {
        if index >= 4 {
            return false;
        }
        if self.is_axis_aligned() {
            let opposite = self.corners[(index + 2) % 4];
            let rect = Rect::from_points(point, opposite);
            *self = Self::new(rect);
        } else {
            self.corners[index] = point;
        }
        true
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
        let points = coords_to_points(&r.read_float_array("points"));
        let corners: [Point; 4] = points.try_into().map_err(|pts: Vec<Point>| {
            StorageError::Serialization(format!("rect needs 4 points, got {}", pts.len()))
        })?;
        self.corners = corners;
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
