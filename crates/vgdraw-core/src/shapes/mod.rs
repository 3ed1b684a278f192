//! Shape definitions.
//!
//! A [`Shape`] carries the attributes every drawable shares (id, tag, flags,
//! pen/brush context, owner) and delegates geometry to a boxed [`ShapeKind`].
//! Kinds are created by name through a [`ShapeRegistry`], so applications can
//! add their own types next to the built-in ones.

mod context;
mod ellipse;
mod group;
mod image;
mod line;
mod lines;
mod rect;
mod registry;
mod splines;

pub use context::{Argb, ArrowHead, ContextMask, LineStyle, ShapeContext};
pub use ellipse::EllipseShape;
pub use group::GroupShape;
pub use image::ImageShape;
pub use line::LineShape;
pub use lines::LinesShape;
pub use rect::RectShape;
pub use registry::{ShapeFactory, ShapeRegistry};
pub use splines::SplinesShape;

use crate::graphics::Graphics;
use crate::storage::{ShapeReader, ShapeWriter, StorageResult};
use bitflags::bitflags;
use kurbo::{Affine, BezPath, Line, ParamCurveNearest, Point, Rect};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Unique identifier of a shape within a document. Zero is never assigned.
pub type ShapeId = u32;

bitflags! {
    /// Boolean shape state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShapeFlags: u32 {
        /// Excluded from default hit-testing, erase and move.
        const LOCKED = 0x01;
        /// Content is not drawn.
        const HIDDEN = 0x02;
        const SELECTED = 0x04;
    }
}

/// Geometry capability implemented by every shape type.
pub trait ShapeKind: fmt::Debug + Send + Sync + 'static {
    /// Registry name, also written as the record `type`.
    fn type_name(&self) -> &'static str;

    /// Bounding box in model coordinates.
    fn bounds(&self) -> Rect;

    /// Whether `point` lies within `tolerance` of the outline.
    fn hit_test(&self, point: Point, tolerance: f64) -> bool;

    /// Interior test for closed kinds.
    fn contains(&self, _point: Point) -> bool {
        false
    }

    /// Whether any part of the shape lies inside `rect`.
    fn hit_test_box(&self, rect: Rect) -> bool {
        !rect.intersect(self.bounds()).is_zero_area() || rect.contains(self.bounds().center())
    }

    fn is_closed(&self) -> bool {
        false
    }

    /// Outline used for drawing and clipping.
    fn to_path(&self) -> BezPath;

    fn draw(&self, gs: &mut Graphics<'_>, ctx: &ShapeContext) -> bool {
        gs.draw_path(ctx, &self.to_path(), self.is_closed())
    }

    fn transform(&mut self, affine: Affine);

    fn point_count(&self) -> usize;

    fn point(&self, index: usize) -> Option<Point>;

    /// Move one control point. Returns false if the index is out of range.
    fn set_point(&mut self, index: usize, point: Point) -> bool;

    /// Write kind-specific fields. The default writes the control points.
    fn save(&self, w: &mut dyn ShapeWriter) {
        let coords: Vec<f64> = (0..self.point_count())
            .filter_map(|i| self.point(i))
            .flat_map(|p| [p.x, p.y])
            .collect();
        w.write_float_array("points", &coords);
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()>;

    fn clone_box(&self) -> Box<dyn ShapeKind>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn ShapeKind> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A drawable shape.
#[derive(Debug, Clone)]
pub struct Shape {
    pub(crate) id: ShapeId,
    /// Application correlation value.
    pub tag: i32,
    pub flags: ShapeFlags,
    pub context: ShapeContext,
    /// Containing group, if any. Non-owning.
    pub(crate) owner: Option<ShapeId>,
    /// Bumped on every in-place edit while owned by a container.
    pub(crate) version: u32,
    kind: Box<dyn ShapeKind>,
}

impl Shape {
    /// Create an unattached shape. The id is assigned when it joins a document.
    pub fn new(kind: impl ShapeKind) -> Self {
        Self::from_box(Box::new(kind))
    }

    pub fn from_box(kind: Box<dyn ShapeKind>) -> Self {
        Self {
            id: 0,
            tag: 0,
            flags: ShapeFlags::empty(),
            context: ShapeContext::default(),
            owner: None,
            version: 0,
            kind,
        }
    }

    pub fn with_context(mut self, context: ShapeContext) -> Self {
        self.context = context;
        self
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn owner(&self) -> Option<ShapeId> {
        self.owner
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn kind(&self) -> &dyn ShapeKind {
        self.kind.as_ref()
    }

    pub fn kind_mut(&mut self) -> &mut dyn ShapeKind {
        self.kind.as_mut()
    }

    /// Downcast the geometry to a concrete kind.
    pub fn downcast<T: ShapeKind>(&self) -> Option<&T> {
        self.kind.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: ShapeKind>(&mut self) -> Option<&mut T> {
        self.kind.as_any_mut().downcast_mut::<T>()
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(ShapeFlags::LOCKED)
    }

    pub fn is_hidden(&self) -> bool {
        self.flags.contains(ShapeFlags::HIDDEN)
    }

    pub fn bounds(&self) -> Rect {
        self.kind.bounds()
    }

    /// Hit test against the outline, widened by half the line width,
    /// or the interior for filled closed shapes.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        if self.is_hidden() {
            return false;
        }
        let half_width = self.context.line_width.max(0.0) / 2.0;
        if self.kind.hit_test(point, tolerance + half_width) {
            return true;
        }
        self.kind.is_closed() && self.context.has_fill() && self.kind.contains(point)
    }

    pub fn hit_test_box(&self, rect: Rect) -> bool {
        !self.is_hidden() && self.kind.hit_test_box(rect)
    }

    pub fn to_path(&self) -> BezPath {
        self.kind.to_path()
    }

    /// Draw through a graphics handle. Hidden shapes draw nothing.
    pub fn draw(&self, gs: &mut Graphics<'_>) -> bool {
        if self.is_hidden() || !gs.is_visible(self.bounds()) {
            return false;
        }
        self.kind.draw(gs, &self.context)
    }

    pub fn draw_with(&self, gs: &mut Graphics<'_>, ctx: &ShapeContext) -> bool {
        !self.is_hidden() && self.kind.draw(gs, ctx)
    }

    pub fn transform(&mut self, affine: Affine) {
        self.kind.transform(affine);
    }

    pub fn point_count(&self) -> usize {
        self.kind.point_count()
    }

    pub fn point(&self, index: usize) -> Option<Point> {
        self.kind.point(index)
    }

    pub fn points(&self) -> Vec<Point> {
        (0..self.point_count()).filter_map(|i| self.point(i)).collect()
    }

    pub fn set_point(&mut self, index: usize, point: Point) -> bool {
        self.kind.set_point(index, point)
    }

    /// Index of the control point nearest to `point` within `tolerance`.
    pub fn handle_at(&self, point: Point, tolerance: f64) -> Option<usize> {
        (0..self.point_count())
            .filter_map(|i| self.point(i).map(|p| (i, p.distance(point))))
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Write the full record: common attributes then kind fields.
    pub fn save(&self, w: &mut dyn ShapeWriter) {
        w.write_string("type", self.kind.type_name());
        w.write_int("id", self.id as i64);
        w.write_int("tag", self.tag as i64);
        w.write_int("flags", self.flags.bits() as i64);
        w.write_int("lineColor", self.context.line_color.0 as i64);
        w.write_float("lineWidth", self.context.line_width);
        w.write_int("lineStyle", self.context.line_style.code() as i64);
        w.write_int("fillColor", self.context.fill_color.0 as i64);
        w.write_int("startArrow", self.context.start_arrow.0 as i64);
        w.write_int("endArrow", self.context.end_arrow.0 as i64);
        if let Some(owner) = self.owner {
            w.write_int("owner", owner as i64);
        }
        self.kind.save(w);
    }

    /// Restore the common attributes of a record into a freshly created shape.
    pub(crate) fn load_common(&mut self, r: &dyn ShapeReader) {
        self.id = r.read_int("id", 0) as ShapeId;
        self.tag = r.read_int("tag", 0) as i32;
        self.flags = ShapeFlags::from_bits_truncate(r.read_int("flags", 0) as u32);
        let defaults = ShapeContext::default();
        self.context = ShapeContext {
            line_color: Argb(r.read_int("lineColor", defaults.line_color.0 as i64) as u32),
            line_width: r.read_float("lineWidth", defaults.line_width),
            line_style: LineStyle::from_code(r.read_int("lineStyle", 0)).unwrap_or_default(),
            fill_color: Argb(r.read_int("fillColor", 0) as u32),
            start_arrow: ArrowHead(r.read_int("startArrow", 0) as u8),
            end_arrow: ArrowHead(r.read_int("endArrow", 0) as u8),
        };
        self.owner = match r.read_int("owner", 0) {
            0 => None,
            id => Some(id as ShapeId),
        };
    }
}

/// Distance from a point to the segment a-b.
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    if a == b {
        return point.distance(a);
    }
    Line::new(a, b).nearest(point, 1e-9).distance_sq.sqrt()
}

/// Minimum distance from a point to a polyline.
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    match points {
        [] => f64::INFINITY,
        [only] => point.distance(*only),
        _ => points
            .windows(2)
            .map(|w| point_to_segment_dist(point, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Whether the segment a-b touches `rect` (Liang-Barsky clipping).
pub fn segment_intersects_rect(a: Point, b: Point, rect: Rect) -> bool {
    let d = b - a;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    let checks = [
        (-d.x, a.x - rect.x0),
        (d.x, rect.x1 - a.x),
        (-d.y, a.y - rect.y0),
        (d.y, rect.y1 - a.y),
    ];
    for (p, q) in checks {
        if p.abs() < f64::EPSILON {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return false;
        }
    }
    true
}

/// Whether any segment of a polyline touches `rect`.
pub fn polyline_intersects_rect(points: &[Point], closed: bool, rect: Rect) -> bool {
    if points.iter().any(|p| rect.contains(*p)) {
        return true;
    }
    let mut hit = points
        .windows(2)
        .any(|w| segment_intersects_rect(w[0], w[1], rect));
    if !hit && closed && points.len() > 2 {
        hit = segment_intersects_rect(points[points.len() - 1], points[0], rect);
    }
    hit
}

/// Even-odd point-in-polygon test.
pub fn polygon_contains(points: &[Point], point: Point) -> bool {
    let mut inside = false;
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (points[i], points[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Bounding box of a point list. Empty input yields a zero rect at the origin.
pub fn points_bounds(points: &[Point]) -> Rect {
    let Some(first) = points.first() else {
        return Rect::ZERO;
    };
    points
        .iter()
        .skip(1)
        .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p))
}

/// Pair up a flat coordinate array. A trailing odd value is ignored.
pub fn coords_to_points(coords: &[f64]) -> Vec<Point> {
    coords
        .chunks_exact(2)
        .map(|c| Point::new(c[0], c[1]))
        .collect()
}
