//! Group shape: an owned list of child shapes moved and drawn as one.

use super::{Shape, ShapeContext, ShapeId, ShapeKind};
use crate::graphics::Graphics;
use crate::storage::{ShapeReader, ShapeWriter, StorageResult};
use kurbo::{Affine, BezPath, Point, Rect};
use std::any::Any;

#[derive(Debug, Clone, Default)]
pub struct GroupShape {
    children: Vec<Shape>,
}

impl GroupShape {
    pub const TYPE: &'static str = "group";

    pub fn new(children: Vec<Shape>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &[Shape] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Point every child at its containing group.
    pub(crate) fn set_owner(&mut self, owner: ShapeId) {
        for child in &mut self.children {
            child.owner = Some(owner);
        }
    }

    /// Break the group apart, releasing ownership of the children.
    pub fn into_children(self) -> Vec<Shape> {
        self.children
            .into_iter()
            .map(|mut child| {
                child.owner = None;
                child
            })
            .collect()
    }

    /// Flattened control points of all children, in child order.
    fn locate(&self, mut index: usize) -> Option<(usize, usize)> {
        for (i, child) in self.children.iter().enumerate() {
            let n = child.point_count();
            if index < n {
                return Some((i, index));
            }
            index -= n;
        }
        None
    }
}

impl ShapeKind for GroupShape {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn bounds(&self) -> Rect {
        self.children
            .iter()
            .map(Shape::bounds)
            .reduce(|a, b| a.union(b))
            .unwrap_or(Rect::ZERO)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.children.iter().any(|c| c.hit_test(point, tolerance))
    }

    fn contains(&self, point: Point) -> bool {
        self.children.iter().any(|c| c.kind().contains(point))
    }

    fn hit_test_box(&self, rect: Rect) -> bool {
        self.children.iter().any(|c| c.hit_test_box(rect))
    }

    fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        for child in &self.children {
            path.extend(child.to_path());
        }
        path
    }

    /// Children keep their own contexts.
    fn draw(&self, gs: &mut Graphics<'_>, _ctx: &ShapeContext) -> bool {
        self.children
            .iter()
            .fold(false, |drawn, child| child.draw(gs) || drawn)
    }

    fn transform(&mut self, affine: Affine) {
        for child in &mut self.children {
            child.transform(affine);
        }
    }

    fn point_count(&self) -> usize {
        self.children.iter().map(Shape::point_count).sum()
    }

    fn point(&self, index: usize) -> Option<Point> {
        let (child, i) = self.locate(index)?;
        self.children[child].point(i)
    }

    fn set_point(&mut self, index: usize, point: Point) -> bool {
        match self.locate(index) {
            Some((child, i)) => self.children[child].set_point(i, point),
            None => false,
        }
    }

    fn save(&self, w: &mut dyn ShapeWriter) {
        w.write_shapes("children", &self.children);
    }

    fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
        self.children = r.read_shapes("children")?;
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
