//! Drawing through an external canvas.
//!
//! The kernel never rasterizes. It issues pen/brush/path calls on a
//! [`Canvas`] supplied by the host, mapped into display space by a pooled
//! [`GraphicsContext`]. A context is borrowed for one paint pass and returns
//! its slot to the [`GraphicsPool`] when dropped, on every exit path.

use crate::shapes::{Argb, ArrowHead, LineStyle, ShapeContext};
use kurbo::{Affine, BezPath, PathEl, Point, Rect, Size, Vec2};
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a canvas backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CanvasError {
    #[error("Unsupported canvas operation: {0}")]
    Unsupported(String),
    #[error("Canvas failure: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// Decoration drawn over an editable control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Vertex,
    /// The point currently being dragged.
    Active,
}

/// Drawing primitives provided by the host platform.
///
/// All coordinates are display pixels. Implementations are called from
/// render worker threads.
pub trait Canvas: Send {
    /// Start a pass. Returns false if the surface cannot be drawn now.
    fn begin_paint(&mut self) -> bool;
    fn end_paint(&mut self);

    fn set_pen(&mut self, argb: Argb, width: f64, style: LineStyle, phase: f64);
    /// Brush style 0 is solid; other values are backend specific.
    fn set_brush(&mut self, argb: Argb, style: i32);

    fn clear_rect(&mut self, rect: Rect);
    fn draw_rect(&mut self, rect: Rect, stroke: bool, fill: bool);
    fn draw_line(&mut self, from: Point, to: Point);
    fn draw_ellipse(&mut self, rect: Rect, stroke: bool, fill: bool);

    fn begin_path(&mut self);
    fn move_to(&mut self, p: Point);
    fn line_to(&mut self, p: Point);
    fn bezier_to(&mut self, c1: Point, c2: Point, p: Point);
    fn quad_to(&mut self, c: Point, p: Point);
    fn close_path(&mut self);
    fn draw_path(&mut self, stroke: bool, fill: bool);

    fn save_clip(&mut self);
    fn restore_clip(&mut self);
    /// Intersect the clip with a rectangle. Returns false if the result is empty.
    fn clip_rect(&mut self, rect: Rect) -> bool;
    /// Intersect the clip with the current path.
    fn clip_path(&mut self) -> Result<bool, CanvasError>;

    fn draw_handle(&mut self, at: Point, kind: HandleKind) -> bool;
    /// Draw a named image centered at a point, rotated by `angle` radians.
    fn draw_bitmap(&mut self, name: &str, center: Point, size: Size, angle: f64) -> bool;
    /// Returns the width of the drawn text.
    fn draw_text_at(&mut self, text: &str, at: Point, line_height: f64, align: TextAlign) -> f64;
}

/// Fixed set of reusable graphics slots shared by the render workers of a view.
#[derive(Debug)]
pub struct GraphicsPool {
    slots: Mutex<Vec<bool>>,
}

impl GraphicsPool {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(vec![false; size.max(1)]),
        })
    }

    /// Take a free slot. Returns `None` when every slot is in use.
    pub fn acquire(self: &Arc<Self>, xform: Affine, viewport: Size) -> Option<GraphicsContext> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter().position(|used| !used) else {
            warn!("graphics pool exhausted ({} slots)", slots.len());
            return None;
        };
        slots[slot] = true;
        Some(GraphicsContext {
            pool: Arc::clone(self),
            slot,
            xform,
            clip: Rect::from_origin_size(Point::ZERO, viewport),
        })
    }

    pub fn in_use(&self) -> usize {
        self.slots.lock().iter().filter(|used| **used).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, slot: usize) {
        if let Some(used) = self.slots.lock().get_mut(slot) {
            *used = false;
        }
    }
}

/// A borrowed graphics slot: model-to-display transform and display clip.
#[derive(Debug)]
pub struct GraphicsContext {
    pool: Arc<GraphicsPool>,
    slot: usize,
    xform: Affine,
    clip: Rect,
}

impl GraphicsContext {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn xform(&self) -> Affine {
        self.xform
    }

    pub fn zoom(&self) -> f64 {
        self.xform.as_coeffs()[0].hypot(self.xform.as_coeffs()[1])
    }

    pub fn clip(&self) -> Rect {
        self.clip
    }

    pub fn set_clip(&mut self, clip: Rect) {
        self.clip = clip;
    }

    /// Begin a paint pass on `canvas`. The pass ends when the returned
    /// [`Graphics`] is dropped.
    pub fn paint<'a>(&'a self, canvas: &'a mut dyn Canvas) -> Option<Graphics<'a>> {
        if !canvas.begin_paint() {
            return None;
        }
        Some(Graphics { ctx: self, canvas })
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

/// An active paint pass.
pub struct Graphics<'a> {
    ctx: &'a GraphicsContext,
    canvas: &'a mut dyn Canvas,
}

impl Graphics<'_> {
    pub fn zoom(&self) -> f64 {
        self.ctx.zoom()
    }

    pub fn xform(&self) -> Affine {
        self.ctx.xform
    }

    pub fn canvas(&mut self) -> &mut dyn Canvas {
        &mut *self.canvas
    }

    /// Whether model-space `bounds` touch the display clip.
    pub fn is_visible(&self, bounds: Rect) -> bool {
        let display = self.ctx.xform.transform_rect_bbox(bounds).inflate(1.0, 1.0);
        display.intersect(self.ctx.clip).area() > 0.0
            || (display.width() <= 2.0 && self.ctx.clip.contains(display.center()))
    }

    pub fn clear(&mut self) {
        self.canvas.clear_rect(self.ctx.clip);
    }

    fn apply_context(&mut self, ctx: &ShapeContext, fill: bool) -> (bool, bool) {
        let stroke = !ctx.is_null_line();
        if stroke {
            self.canvas.set_pen(
                ctx.line_color,
                ctx.display_width(self.zoom()),
                ctx.line_style,
                0.0,
            );
        }
        let fill = fill && ctx.has_fill();
        if fill {
            self.canvas.set_brush(ctx.fill_color, 0);
        }
        (stroke, fill)
    }

    fn emit_path(&mut self, path: &BezPath) {
        let xf = self.ctx.xform;
        self.canvas.begin_path();
        for el in path.elements() {
            match *el {
                PathEl::MoveTo(p) => self.canvas.move_to(xf * p),
                PathEl::LineTo(p) => self.canvas.line_to(xf * p),
                PathEl::QuadTo(c, p) => self.canvas.quad_to(xf * c, xf * p),
                PathEl::CurveTo(c1, c2, p) => self.canvas.bezier_to(xf * c1, xf * c2, xf * p),
                PathEl::ClosePath => self.canvas.close_path(),
            }
        }
    }

    /// Stroke and optionally fill a model-space path with a shape context.
    pub fn draw_path(&mut self, ctx: &ShapeContext, path: &BezPath, closed: bool) -> bool {
        if path.elements().is_empty() {
            return false;
        }
        let (stroke, fill) = self.apply_context(ctx, closed);
        if !stroke && !fill {
            return false;
        }
        self.emit_path(path);
        self.canvas.draw_path(stroke, fill);
        if stroke && !closed {
            self.draw_arrow_heads(ctx, path);
        }
        true
    }

    pub fn draw_rect(&mut self, ctx: &ShapeContext, rect: Rect) -> bool {
        let (stroke, fill) = self.apply_context(ctx, true);
        if !stroke && !fill {
            return false;
        }
        let display = self.ctx.xform.transform_rect_bbox(rect);
        self.canvas.draw_rect(display, stroke, fill);
        true
    }

    pub fn draw_bitmap(&mut self, name: &str, center: Point, size: Size, angle: f64) -> bool {
        let zoom = self.zoom();
        self.canvas.draw_bitmap(
            name,
            self.ctx.xform * center,
            Size::new(size.width * zoom, size.height * zoom),
            angle,
        )
    }

    pub fn draw_handle(&mut self, at: Point, kind: HandleKind) -> bool {
        self.canvas.draw_handle(self.ctx.xform * at, kind)
    }

    pub fn draw_text_at(&mut self, text: &str, at: Point, line_height: f64, align: TextAlign) -> f64 {
        let zoom = self.zoom();
        self.canvas
            .draw_text_at(text, self.ctx.xform * at, line_height * zoom, align)
    }

    /// Clip subsequent drawing to a model-space path until [`Self::restore_clip`].
    pub fn set_clip_path(&mut self, path: &BezPath) -> Result<bool, CanvasError> {
        self.canvas.save_clip();
        self.emit_path(path);
        self.canvas.clip_path()
    }

    pub fn set_clip_rect(&mut self, rect: Rect) -> bool {
        self.canvas.save_clip();
        let display = self.ctx.xform.transform_rect_bbox(rect);
        self.canvas.clip_rect(display)
    }

    pub fn restore_clip(&mut self) {
        self.canvas.restore_clip();
    }

    fn draw_arrow_heads(&mut self, ctx: &ShapeContext, path: &BezPath) {
        let pts: Vec<Point> = path
            .elements()
            .iter()
            .filter_map(|el| el.end_point())
            .collect();
        if pts.len() < 2 {
            return;
        }
        let last = pts.len() - 1;
        if ctx.start_arrow != ArrowHead::default() {
            self.draw_arrow(ctx, pts[1], pts[0]);
        }
        if ctx.end_arrow != ArrowHead::default() {
            self.draw_arrow(ctx, pts[last - 1], pts[last]);
        }
    }

    /// Filled triangle pointing from `from` to `tip`, sized by the pen.
    fn draw_arrow(&mut self, ctx: &ShapeContext, from: Point, tip: Point) {
        let xf = self.ctx.xform;
        let (from, tip) = (xf * from, xf * tip);
        let dir = tip - from;
        if dir.hypot() < f64::EPSILON {
            return;
        }
        let len = (ctx.display_width(self.zoom()) * 4.0).max(6.0);
        let back = dir.normalize() * len;
        let side = Vec2::new(-back.y, back.x) * 0.4;
        self.canvas.set_brush(ctx.line_color, 0);
        self.canvas.begin_path();
        self.canvas.move_to(tip);
        self.canvas.line_to(tip - back + side);
        self.canvas.line_to(tip - back - side);
        self.canvas.close_path();
        self.canvas.draw_path(false, true);
    }
}

impl Drop for Graphics<'_> {
    fn drop(&mut self) {
        self.canvas.end_paint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts calls; enough to observe what a pass emitted.
    #[derive(Default)]
    struct CountingCanvas {
        begun: usize,
        ended: usize,
        paths: usize,
        bitmaps: Vec<(String, Point, Size)>,
        refuse: bool,
    }

    impl Canvas for CountingCanvas {
        fn begin_paint(&mut self) -> bool {
            if self.refuse {
                return false;
            }
            self.begun += 1;
            true
        }
        fn end_paint(&mut self) {
            self.ended += 1;
        }
        fn set_pen(&mut self, _: Argb, _: f64, _: LineStyle, _: f64) {}
        fn set_brush(&mut self, _: Argb, _: i32) {}
        fn clear_rect(&mut self, _: Rect) {}
        fn draw_rect(&mut self, _: Rect, _: bool, _: bool) {}
        fn draw_line(&mut self, _: Point, _: Point) {}
        fn draw_ellipse(&mut self, _: Rect, _: bool, _: bool) {}
        fn begin_path(&mut self) {}
        fn move_to(&mut self, _: Point) {}
        fn line_to(&mut self, _: Point) {}
        fn bezier_to(&mut self, _: Point, _: Point, _: Point) {}
        fn quad_to(&mut self, _: Point, _: Point) {}
        fn close_path(&mut self) {}
        fn draw_path(&mut self, _: bool, _: bool) {
            self.paths += 1;
        }
        fn save_clip(&mut self) {}
        fn restore_clip(&mut self) {}
        fn clip_rect(&mut self, _: Rect) -> bool {
            true
        }
        fn clip_path(&mut self) -> Result<bool, CanvasError> {
            Err(CanvasError::Unsupported("clip_path".into()))
        }
        fn draw_handle(&mut self, _: Point, _: HandleKind) -> bool {
            true
        }
        fn draw_bitmap(&mut self, name: &str, center: Point, size: Size, _: f64) -> bool {
            self.bitmaps.push((name.to_string(), center, size));
            true
        }
        fn draw_text_at(&mut self, text: &str, _: Point, _: f64, _: TextAlign) -> f64 {
            text.len() as f64
        }
    }

    #[test]
    fn test_pool_slots_released_on_drop() {
        let pool = GraphicsPool::new(2);
        let a = pool.acquire(Affine::IDENTITY, Size::new(100.0, 100.0)).unwrap();
        let b = pool.acquire(Affine::IDENTITY, Size::new(100.0, 100.0)).unwrap();
        assert_ne!(a.slot(), b.slot());
        assert!(pool.acquire(Affine::IDENTITY, Size::ZERO).is_none());
        drop(a);
        assert_eq!(pool.in_use(), 1);
        assert!(pool.acquire(Affine::IDENTITY, Size::ZERO).is_some());
    }

    #[test]
    fn test_paint_pass_ends_on_drop() {
        let pool = GraphicsPool::new(1);
        let ctx = pool.acquire(Affine::scale(2.0), Size::new(100.0, 100.0)).unwrap();
        let mut canvas = CountingCanvas::default();
        {
            let mut gs = ctx.paint(&mut canvas).unwrap();
            let mut path = BezPath::new();
            path.move_to(Point::ZERO);
            path.line_to(Point::new(10.0, 10.0));
            assert!(gs.draw_path(&ShapeContext::default(), &path, false));
            assert!(gs.draw_bitmap("a.png", Point::new(5.0, 5.0), Size::new(4.0, 2.0), 0.0));
        }
        assert_eq!(canvas.begun, 1);
        assert_eq!(canvas.ended, 1);
        assert_eq!(canvas.paths, 1);
        assert_eq!(canvas.bitmaps[0].1, Point::new(10.0, 10.0));
        assert_eq!(canvas.bitmaps[0].2, Size::new(8.0, 4.0));
    }

    #[test]
    fn test_refused_paint() {
        let pool = GraphicsPool::new(1);
        let ctx = pool.acquire(Affine::IDENTITY, Size::new(10.0, 10.0)).unwrap();
        let mut canvas = CountingCanvas {
            refuse: true,
            ..Default::default()
        };
        assert!(ctx.paint(&mut canvas).is_none());
        assert_eq!(canvas.ended, 0);
    }

    #[test]
    fn test_visibility_uses_display_clip() {
        let pool = GraphicsPool::new(1);
        let ctx = pool
            .acquire(Affine::translate((-100.0, 0.0)), Size::new(50.0, 50.0))
            .unwrap();
        let mut canvas = CountingCanvas::default();
        let gs = ctx.paint(&mut canvas).unwrap();
        assert!(!gs.is_visible(Rect::new(0.0, 0.0, 10.0, 10.0)));
        assert!(gs.is_visible(Rect::new(110.0, 10.0, 120.0, 20.0)));
    }

    #[test]
    fn test_end_arrow_adds_fill_path() {
        let pool = GraphicsPool::new(1);
        let ctx = pool.acquire(Affine::IDENTITY, Size::new(100.0, 100.0)).unwrap();
        let mut canvas = CountingCanvas::default();
        {
            let mut gs = ctx.paint(&mut canvas).unwrap();
            let mut path = BezPath::new();
            path.move_to(Point::ZERO);
            path.line_to(Point::new(50.0, 0.0));
            let style = ShapeContext {
                end_arrow: ArrowHead(1),
                ..ShapeContext::default()
            };
            gs.draw_path(&style, &path, false);
        }
        assert_eq!(canvas.paths, 2);
    }
}
