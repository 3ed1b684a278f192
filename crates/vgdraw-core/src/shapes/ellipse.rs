//! Ellipse shape.

use super::{ShapeKind, coords_to_points};
use crate::storage::{ShapeReader, ShapeWriter, StorageError, StorageResult};
use kurbo::{Affine, BezPath, Ellipse, Point, Rect, Shape as _, Vec2};
use std::any::Any;

/// An ellipse with optional rotation.
///
/// Control points are the ends of the two radii: +x, +y, -x, -y in the
/// ellipse's own frame.
#[derive(Debug, Clone)]
pub struct EllipseShape {
    ellipse: Ellipse,
}

impl EllipseShape {
    pub const TYPE: &'static str = "ellipse";

    pub fn new(center: Point, radius_x: f64, radius_y: f64) -> Self {
        Self {
            ellipse: Ellipse::new(center, (radius_x.abs(), radius_y.abs()), 0.0),
        }
    }

    /// Ellipse inscribed in the rectangle spanning two corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let rect = Rect::from_points(a, b);
        Self::new(rect.center(), rect.width() / 2.0, rect.height() / 2.0)
    }

    pub fn center(&self) -> Point {
        self.ellipse.center()
    }

    pub fn radii(&self) -> Vec2 {
        self.ellipse.radii()
    }

    pub fn rotation(&self) -> f64 {
        self.ellipse.rotation()
    }

    /// Point in the ellipse frame (unrotated, centered).
    fn to_local(&self, point: Point) -> Vec2 {
        let v = point - self.center();
        let (sin, cos) = (-self.rotation()).sin_cos();
        Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
    }

    fn axis(&self, index: usize) -> Vec2 {
        let radii = self.radii();
        let local = match index {
            0 => Vec2::new(radii.x, 0.0),
            1 => Vec2::new(0.0, radii.y),
            2 => Vec2::new(-radii.x, 0.0),
            _ => Vec2::new(0.0, -radii.y),
        };
        let (sin, cos) = self.rotation().sin_cos();
        Vec2::new(local.x * cos - local.y * sin, local.x * sin + local.y * cos)
    }
}

impl Default for EllipseShape {
    fn default() -> Self {
        Self::new(Point::ZERO, 0.0, 0.0)
    }
}

impl ShapeKind for EllipseShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        self.ellipse.bounding_box()
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let radii = self.radii();
        if radii.x < f64::EPSILON || radii.y < f64::EPSILON {
            return self.to_path().segments().any(|seg| {
                kurbo::ParamCurveNearest::nearest(&seg, point, 1e-6).distance_sq
                    <= tolerance * tolerance
            });
        }
        let local = self.to_local(point);
        let outer = Vec2::new(radii.x + tolerance, radii.y + tolerance);
        let inner = Vec2::new((radii.x - tolerance).max(0.0), (radii.y - tolerance).max(0.0));
        let inside = |r: Vec2| {
            r.x > 0.0 && r.y > 0.0 && (local.x / r.x).powi(2) + (local.y / r.y).powi(2) <= 1.0
        };
        inside(outer) && !inside(inner)
    }

    fn contains(&self, point: Point) -> bool {
        let radii = self.radii();
        if radii.x < f64::EPSILON || radii.y < f64::EPSILON {
            return false;
        }
        let local = self.to_local(point);
        (local.x / radii.x).powi(2) + (local.y / radii.y).powi(2) <= 1.0
    }

    fn is_closed(&self) -> bool {
        true
    }

    fn to_path(&self) -> BezPath {
        self.ellipse.to_path(0.1)
    }

    fn transform(&mut self, affine: Affine) {
        self.ellipse = affine * self.ellipse;
    }

    fn point_count(&self) -> usize {
        4
    }

    fn point(&self, index: usize) -> Option<Point> {
        (index < 4).then(|| self.center() + self.axis(index))
    }

    /// Moving an axis end changes that radius only.
    fn set_point(&mut self, index: usize, point: Point) -> bool {
        if index >= 4 {
            return false;
        }
        let local = self.to_local(point);
        let mut radii = self.radii();
        if index % 2 == 0 {
            radii.x = local.x.abs();
        } else {
            radii.y = local.y.abs();
        }
        self.ellipse = Ellipse::new(self.center(), radii, self.rotation());
        true
    }

    fn save(&self, w: &mut dyn ShapeWriter) {
        let c = self.center();
        let r = self.radii();
        w.write_float_array("points", &[c.x, c.y]);
        w.write_float("rx", r.x);
        w.write_float("ry", r.y);
        w.write_float("angle", self.rotation());
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
        let center = coords_to_points(&r.read_float_array("points"))
            .first()
            .copied()
            .ok_or_else(|| StorageError::Serialization("ellipse without center".into()))?;
        let radii = Vec2::new(r.read_float("rx", 0.0), r.read_float("ry", 0.0));
        self.ellipse = Ellipse::new(center, radii, r.read_float("angle", 0.0));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ellipse_creation() {
        let ellipse = EllipseShape::new(Point::new(50.0, 50.0), 30.0, 20.0);
        assert!((ellipse.center().x - 50.0).abs() < f64::EPSILON);
        assert!((ellipse.radii().x - 30.0).abs() < 1e-9);
        assert!((ellipse.radii().y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_corners() {
        let ellipse = EllipseShape::from_corners(Point::new(0.0, 0.0), Point::new(40.0, 20.0));
        assert_eq!(ellipse.center(), Point::new(20.0, 10.0));
        let b = ellipse.bounds();
        assert!((b.width() - 40.0).abs() < 1e-6);
        assert!((b.height() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_hit_test_outline() {
        let ellipse = EllipseShape::new(Point::ZERO, 30.0, 20.0);
        assert!(ellipse.hit_test(Point::new(30.0, 0.0), 1.0));
        assert!(ellipse.hit_test(Point::new(0.0, -21.0), 2.0));
        assert!(!ellipse.hit_test(Point::ZERO, 2.0));
        assert!(ellipse.contains(Point::ZERO));
    }

    #[test]
    fn test_axis_points_and_set_point() {
        let mut ellipse = EllipseShape::new(Point::new(10.0, 10.0), 5.0, 3.0);
        let p = ellipse.point(1).unwrap();
        assert!((p.x - 10.0).abs() < 1e-9);
        assert!((p.y - 13.0).abs() < 1e-9);

        assert!(ellipse.set_point(0, Point::new(18.0, 10.0)));
        assert!((ellipse.radii().x - 8.0).abs() < 1e-9);
        assert!((ellipse.radii().y - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_transform_scales() {
        let mut ellipse = EllipseShape::new(Point::new(1.0, 1.0), 2.0, 1.0);
        ellipse.transform(Affine::scale(2.0));
        assert_eq!(ellipse.center(), Point::new(2.0, 2.0));
        assert!((ellipse.radii().x - 4.0).abs() < 1e-9);
    }
}
