//! Copy-on-write document snapshots.

use crate::container::Shapes;
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

/// Contents of a document.
#[derive(Debug, Clone)]
pub struct DocumentData {
    /// Unique document identifier.
    pub id: String,
    pub name: String,
    pub shapes: Shapes,
    /// Read-only documents refuse command edits.
    pub read_only: bool,
}

impl Default for DocumentData {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "Untitled".to_string(),
            shapes: Shapes::new(),
            read_only: false,
        }
    }
}

impl DocumentData {
    pub fn change_count(&self) -> u64 {
        self.shapes.change_count()
    }
}

/// A shared, versioned handle to [`DocumentData`].
///
/// Cloning is a reference-count increment. Mutation goes through
/// [`ShapeDocument::make_mut`], which copies the data if any other handle
/// (a published front document, a renderer, a record frame) still holds it,
/// so a snapshot never changes once shared.
#[derive(Debug, Clone, Default)]
pub struct ShapeDocument(Arc<DocumentData>);

impl ShapeDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: DocumentData) -> Self {
        Self(Arc::new(data))
    }

    pub fn make_mut(&mut self) -> &mut DocumentData {
        Arc::make_mut(&mut self.0)
    }

    /// Number of live handles to this exact snapshot.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two handles share one snapshot.
    pub fn ptr_eq(&self, other: &ShapeDocument) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for ShapeDocument {
    type Target = DocumentData;

    fn deref(&self) -> &DocumentData {
        &self.0
    }
}

impl From<DocumentData> for ShapeDocument {
    fn from(data: DocumentData) -> Self {
        Self::from_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{LineShape, Shape};
    use kurbo::Point;

    #[test]
    fn test_published_snapshot_is_not_mutated() {
        let mut back = ShapeDocument::new();
        back.make_mut()
            .shapes
            .add(Shape::new(LineShape::new(Point::ZERO, Point::new(1.0, 1.0))));
        let front = back.clone();
        assert!(front.ptr_eq(&back));
        assert_eq!(front.ref_count(), 2);

        let data = back.make_mut();
        data.shapes.add(Shape::new(LineShape::new(Point::ZERO, Point::new(2.0, 2.0))));
        data.shapes.bump();

        assert!(!front.ptr_eq(&back));
        assert_eq!(front.shapes.len(), 1);
        assert_eq!(front.change_count(), 0);
        assert_eq!(back.shapes.len(), 2);
        assert_eq!(back.change_count(), 1);
    }

    #[test]
    fn test_unshared_edit_is_in_place() {
        let mut doc = ShapeDocument::new();
        let before: *const DocumentData = &*doc;
        doc.make_mut().name = "plan".into();
        let after: *const DocumentData = &*doc;
        assert_eq!(before, after);
        assert_eq!(doc.name, "plan");
    }
}
