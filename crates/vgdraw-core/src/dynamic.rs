//! Overlay snapshot of shapes being edited.

use crate::graphics::{Graphics, HandleKind};
use crate::shapes::{Argb, LineStyle, Shape, ShapeContext};
use kurbo::{Point, Rect};
use std::sync::Arc;

/// Overlay contents: in-progress shapes and editing decorations.
#[derive(Debug, Clone, Default)]
pub struct DynamicData {
    pub shapes: Vec<Shape>,
    /// Control points to mark, in model space.
    pub handles: Vec<Point>,
    /// Index into `handles` being dragged.
    pub active_handle: Option<usize>,
    /// Rubber-band selection rectangle.
    pub marquee: Option<Rect>,
}

/// A published overlay. Replaced wholesale on every change and shared with
/// render workers by reference count.
#[derive(Debug, Clone, Default)]
pub struct DynamicShapeSet(Arc<DynamicData>);

impl DynamicShapeSet {
    pub fn new(data: DynamicData) -> Self {
        Self(Arc::new(data))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.shapes.is_empty() && self.0.handles.is_empty() && self.0.marquee.is_none()
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.0.shapes
    }

    pub fn handles(&self) -> &[Point] {
        &self.0.handles
    }

    pub fn marquee(&self) -> Option<Rect> {
        self.0.marquee
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &DynamicShapeSet) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Draw shapes, then handles and the marquee on top. Returns the number
    /// of items drawn.
    pub fn draw(&self, gs: &mut Graphics<'_>) -> usize {
        let mut drawn = self.0.shapes.iter().filter(|s| s.draw(gs)).count();
        for (i, p) in self.0.handles.iter().enumerate() {
            let kind = if self.0.active_handle == Some(i) {
                HandleKind::Active
            } else {
                HandleKind::Vertex
            };
            if gs.draw_handle(*p, kind) {
                drawn += 1;
            }
        }
        if let Some(rect) = self.0.marquee {
            let pen = ShapeContext {
                line_color: Argb(0xFF40_80FF),
                line_width: -1.0,
                line_style: LineStyle::Dash,
                fill_color: Argb(0x2040_80FF),
                ..ShapeContext::default()
            };
            if gs.draw_rect(&pen, rect) {
                drawn += 1;
            }
        }
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::LineShape;

    #[test]
    fn test_empty_set() {
        let set = DynamicShapeSet::empty();
        assert!(set.is_empty());
        let marquee = DynamicShapeSet::new(DynamicData {
            marquee: Some(Rect::new(0.0, 0.0, 1.0, 1.0)),
            ..DynamicData::default()
        });
        assert!(!marquee.is_empty());
    }

    #[test]
    fn test_shared_by_refcount() {
        let set = DynamicShapeSet::new(DynamicData {
            shapes: vec![Shape::new(LineShape::new(Point::ZERO, Point::new(1.0, 1.0)))],
            ..DynamicData::default()
        });
        let held = set.clone();
        assert_eq!(set.ref_count(), 2);
        assert!(held.ptr_eq(&set));
        drop(held);
        assert_eq!(set.ref_count(), 1);
    }
}
