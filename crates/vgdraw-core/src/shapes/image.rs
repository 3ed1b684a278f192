//! Image reference shape.
//!
//! Only the image name is stored; pixels are resolved by the canvas.

use super::{ShapeContext, ShapeKind, coords_to_points, point_to_polyline_dist, polygon_contains};
use crate::graphics::Graphics;
use crate::storage::{ShapeReader, ShapeWriter, StorageError, StorageResult};
use kurbo::{Affine, BezPath, Point, Rect, Size, Vec2};
use std::any::Any;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageShape {
    /// Resource name understood by the canvas.
    pub name: String,
    pub center: Point,
    pub size: Size,
    /// Rotation in radians.
    pub angle: f64,
}

impl ImageShape {
    pub const TYPE: &'static str = "image";

    pub fn new(name: impl Into<String>, rect: Rect) -> Self {
        Self {
            name: name.into(),
            center: rect.center(),
            size: rect.size(),
            angle: 0.0,
        }
    }

    fn corners(&self) -> [Point; 4] {
        let (hw, hh) = (self.size.width / 2.0, self.size.height / 2.0);
        let rot = Affine::rotate_about(self.angle, self.center);
        [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)]
            .map(|(x, y)| rot * (self.center + Vec2::new(x, y)))
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::new("", Rect::ZERO)
    }
}

impl ShapeKind for ImageShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        super::points_bounds(&self.corners())
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let c = self.corners();
        polygon_contains(&c, point) || point_to_polyline_dist(point, &[c[0], c[1], c[2], c[3], c[0]]) <= tolerance
    }

    fn contains(&self, point: Point) -> bool {
        polygon_contains(&self.corners(), point)
    }

    fn is_closed(&self) -> bool {
        true
    }

    fn to_path(&self) -> BezPath {
        let c = self.corners();
        let mut path = BezPath::new();
        path.move_to(c[0]);
        for p in &c[1..] {
            path.line_to(*p);
        }
        path.close_path();
        path
    }

    fn draw(&self, gs: &mut Graphics<'_>, _ctx: &ShapeContext) -> bool {
        gs.draw_bitmap(&self.name, self.center, self.size, self.angle)
    }

    fn transform(&mut self, affine: Affine) {
        let [a, b, _, d] = self.corners();
        let (a, b, d) = (affine * a, affine * b, affine * d);
        self.center = affine * self.center;
        self.size = Size::new(a.distance(b), a.distance(d));
        let edge = b - a;
        self.angle = edge.y.atan2(edge.x);
    }

    fn point_count(&self) -> usize {
        4
    }

    fn point(&self, index: usize) -> Option<Point> {
        self.corners().get(index).copied()
    }

    /// Resize about the opposite corner, keeping the rotation.
    fn set_point(&mut self, index: usize, point: Point) -> bool {
        if index >= 4 {
            return false;
        }
        let opposite = self.corners()[(index + 2) % 4];
        let unrotate = Affine::rotate(-self.angle);
        let diag = unrotate * (point - opposite).to_point();
        self.center = opposite.midpoint(point);
        self.size = Size::new(diag.x.abs(), diag.y.abs());
        true
    }

    fn save(&self, w: &mut dyn ShapeWriter) {
        w.write_string("name", &self.name);
        w.write_float_array("points", &[self.center.x, self.center.y]);
        w.write_float("width", self.size.width);
        w.write_float("height", self.size.height);
        w.write_float("angle", self.angle);
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
        self.name = r
            .read_string("name")
            .ok_or_else(|| StorageError::Serialization("image without name".into()))?;
        self.center = coords_to_points(&r.read_float_array("points"))
            .first()
            .copied()
            .unwrap_or(Point::ZERO);
        self.size = Size::new(r.read_float("width", 0.0), r.read_float("height", 0.0));
        self.angle = r.read_float("angle", 0.0);
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
