//! Ordered shape container.

use crate::shapes::{GroupShape, Shape, ShapeId};
use kurbo::{Point, Rect};
use std::sync::Arc;

/// Shapes in z-order (first is bottom) plus a change counter.
///
/// Shapes are held behind `Arc` so cloning a container shares every shape;
/// [`Shapes::find_mut`] copies a shape only if another container still
/// references it. Ids come from a counter that never goes down, so an id is
/// not handed out twice even after its shape is removed.
#[derive(Debug, Clone, Default)]
pub struct Shapes {
    items: Vec<Arc<Shape>>,
    change_count: u64,
    /// Highest id ever handed out or added.
    last_id: ShapeId,
}

impl Shapes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Record one committed mutation.
    pub(crate) fn bump(&mut self) -> u64 {
        self.change_count += 1;
        self.change_count
    }

    pub(crate) fn set_change_count(&mut self, count: u64) {
        self.change_count = count;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shape> {
        self.items.iter().map(Arc::as_ref)
    }

    pub fn ids(&self) -> Vec<ShapeId> {
        self.items.iter().map(|s| s.id()).collect()
    }

    pub fn index_of(&self, id: ShapeId) -> Option<usize> {
        self.items.iter().position(|s| s.id() == id)
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.items.iter().find(|s| s.id() == id).map(Arc::as_ref)
    }

    /// Shared handle to a shape, for comparing snapshots.
    pub fn get_shared(&self, id: ShapeId) -> Option<&Arc<Shape>> {
        self.items.iter().find(|s| s.id() == id)
    }

    pub fn contains(&self, id: ShapeId) -> bool {
        self.index_of(id).is_some()
    }

    /// Id the next added shape gets. Never used before in this container.
    pub fn next_id(&self) -> ShapeId {
        self.last_id.saturating_add(1)
    }

    /// Keep ids below `next_id` from being handed out.
    pub fn reserve_ids(&mut self, next_id: ShapeId) {
        self.last_id = self.last_id.max(next_id.saturating_sub(1));
    }

    /// Append a shape on top. A zero or duplicate id is replaced with a fresh
    /// one. Returns the id the shape ended up with.
    pub fn add(&mut self, mut shape: Shape) -> ShapeId {
        if shape.id == 0 || self.contains(shape.id) {
            shape.id = self.next_id();
        }
        let id = shape.id;
        self.last_id = self.last_id.max(id);
        if let Some(group) = shape.downcast_mut::<GroupShape>() {
            group.set_owner(id);
        }
        shape.owner = None;
        self.items.push(Arc::new(shape));
        id
    }

    pub fn remove(&mut self, id: ShapeId) -> Option<Arc<Shape>> {
        let index = self.index_of(id)?;
        Some(self.items.remove(index))
    }

    /// Remove every listed shape. Returns the ids actually removed.
    pub fn remove_all(&mut self, ids: &[ShapeId]) -> Vec<ShapeId> {
        let mut removed = Vec::new();
        self.items.retain(|s| {
            let hit = ids.contains(&s.id());
            if hit {
                removed.push(s.id());
            }
            !hit
        });
        removed
    }

    /// Replace a shape in place, keeping its z-order and id.
    pub fn replace(&mut self, id: ShapeId, mut shape: Shape) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        shape.id = id;
        shape.version = self.items[index].version.wrapping_add(1);
        self.items[index] = Arc::new(shape);
        true
    }

    /// Mutable access to one shape, copying it first if shared.
    pub fn find_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        let item = self.items.iter_mut().find(|s| s.id() == id)?;
        let shape = Arc::make_mut(item);
        shape.version = shape.version.wrapping_add(1);
        Some(shape)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Topmost shape hit at `point`, skipping locked shapes. Hidden shapes
    /// never report a hit themselves.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> Option<ShapeId> {
        self.hit_test_with(point, tolerance, |s| !s.is_locked())
    }

    /// Topmost shape hit at `point` among those passing `accept`.
    pub fn hit_test_with(
        &self,
        point: Point,
        tolerance: f64,
        accept: impl Fn(&Shape) -> bool,
    ) -> Option<ShapeId> {
        self.items
            .iter()
            .rev()
            .filter(|s| accept(s))
            .find(|s| s.hit_test(point, tolerance))
            .map(|s| s.id())
    }

    /// Unlocked visible shapes touching `rect`, bottom to top.
    pub fn shapes_in_rect(&self, rect: Rect) -> Vec<ShapeId> {
        self.items
            .iter()
            .filter(|s| !s.is_locked() && s.hit_test_box(rect))
            .map(|s| s.id())
            .collect()
    }

    /// Union of all shape bounds, hidden ones included.
    pub fn extent(&self) -> Option<Rect> {
        self.items
            .iter()
            .map(|s| s.bounds())
            .reduce(|a, b| a.union(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{LineShape, RectShape, ShapeFlags};

    fn line(y: f64) -> Shape {
        Shape::new(LineShape::new(Point::new(0.0, y), Point::new(100.0, y)))
    }

    #[test]
    fn test_add_assigns_unique_ids() {
        let mut shapes = Shapes::new();
        let a = shapes.add(line(0.0));
        let b = shapes.add(line(10.0));
        assert_ne!(a, 0);
        assert_ne!(a, b);

        let mut dup = line(20.0);
        dup.id = a;
        let c = shapes.add(dup);
        assert_ne!(c, a);
        assert_eq!(shapes.len(), 3);
    }

    #[test]
    fn test_removed_ids_are_not_reused() {
        let mut shapes = Shapes::new();
        let a = shapes.add(line(0.0));
        let b = shapes.add(line(10.0));
        assert!(shapes.remove(b).is_some());
        let c = shapes.add(line(20.0));
        assert_ne!(c, b);
        assert!(c > b);

        shapes.clear();
        let d = shapes.add(line(30.0));
        assert!(![a, b, c].contains(&d));

        let copy = shapes.clone();
        assert_eq!(copy.next_id(), shapes.next_id());
    }

    #[test]
    fn test_reserve_ids_only_raises() {
        let mut shapes = Shapes::new();
        shapes.reserve_ids(10);
        assert_eq!(shapes.add(line(0.0)), 10);
        shapes.reserve_ids(3);
        assert_eq!(shapes.next_id(), 11);

        let mut explicit = line(5.0);
        explicit.id = 40;
        assert_eq!(shapes.add(explicit), 40);
        assert_eq!(shapes.next_id(), 41);
    }

    #[test]
    fn test_hit_test_topmost_and_skips_locked() {
        let mut shapes = Shapes::new();
        let bottom = shapes.add(line(0.0));
        let top = shapes.add(line(0.0));
        assert_eq!(shapes.hit_test(Point::new(50.0, 0.0), 2.0), Some(top));

        shapes.find_mut(top).unwrap().flags.insert(ShapeFlags::LOCKED);
        assert_eq!(shapes.hit_test(Point::new(50.0, 0.0), 2.0), Some(bottom));
        assert_eq!(
            shapes.hit_test_with(Point::new(50.0, 0.0), 2.0, |_| true),
            Some(top)
        );
    }

    #[test]
    fn test_find_mut_copies_shared_shape() {
        let mut shapes = Shapes::new();
        let id = shapes.add(line(0.0));
        let snapshot = shapes.clone();

        shapes
            .find_mut(id)
            .unwrap()
            .transform(kurbo::Affine::translate((0.0, 5.0)));

        assert_eq!(snapshot.get(id).unwrap().point(0), Some(Point::new(0.0, 0.0)));
        assert_eq!(shapes.get(id).unwrap().point(0), Some(Point::new(0.0, 5.0)));
        assert_eq!(shapes.get(id).unwrap().version(), 1);
    }

    #[test]
    fn test_shapes_in_rect() {
        let mut shapes = Shapes::new();
        let a = shapes.add(line(0.0));
        shapes.add(Shape::new(RectShape::new(Rect::new(200.0, 200.0, 220.0, 220.0))));
        assert_eq!(shapes.shapes_in_rect(Rect::new(40.0, -5.0, 60.0, 5.0)), vec![a]);
    }

    #[test]
    fn test_remove_all() {
        let mut shapes = Shapes::new();
        let a = shapes.add(line(0.0));
        let b = shapes.add(line(10.0));
        assert_eq!(shapes.remove_all(&[b, 99]), vec![b]);
        assert_eq!(shapes.ids(), vec![a]);
    }
}
