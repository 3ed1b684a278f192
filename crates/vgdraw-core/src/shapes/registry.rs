//! Shape type registry.

use super::{
    EllipseShape, GroupShape, ImageShape, LineShape, LinesShape, RectShape, Shape, ShapeKind,
    SplinesShape,
};
use crate::storage::{ShapeReader, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Creates an empty shape kind, later filled by [`ShapeKind::load`].
pub type ShapeFactory = Arc<dyn Fn() -> Box<dyn ShapeKind> + Send + Sync>;

/// Maps record type names to factories.
#[derive(Clone, Default)]
pub struct ShapeRegistry {
    factories: BTreeMap<String, ShapeFactory>,
}

impl fmt::Debug for ShapeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl ShapeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in shape type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_default::<LineShape>(LineShape::TYPE);
        registry.register_default::<LinesShape>(LinesShape::TYPE);
        registry.register_default::<SplinesShape>(SplinesShape::TYPE);
        registry.register_default::<RectShape>(RectShape::TYPE);
        registry.register_default::<EllipseShape>(EllipseShape::TYPE);
        registry.register_default::<ImageShape>(ImageShape::TYPE);
        registry.register_default::<GroupShape>(GroupShape::TYPE);
        registry
    }

    /// Register a factory, replacing any previous one for the same name.
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn ShapeKind> + Send + Sync + 'static,
    {
        self.factories
            .insert(type_name.to_string(), Arc::new(factory));
    }

    /// Register a kind whose empty value is its `Default`.
    pub fn register_default<T: ShapeKind + Default>(&mut self, type_name: &str) {
        self.register(type_name, || Box::new(T::default()));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Create an empty shape of a registered type.
    pub fn create(&self, type_name: &str) -> Option<Shape> {
        self.factories
            .get(type_name)
            .map(|factory| Shape::from_box(factory()))
    }

    /// Build a shape from its record.
    pub fn load_shape(&self, r: &dyn ShapeReader) -> StorageResult<Shape> {
        let type_name = r
            .read_string("type")
            .ok_or_else(|| StorageError::Serialization("shape record without type".into()))?;
        let mut shape = self
            .create(&type_name)
            .ok_or(StorageError::UnknownShapeType(type_name))?;
        shape.load_common(r);
        shape.kind_mut().load(r)?;
        let id = shape.id;
        if let Some(group) = shape.downcast_mut::<GroupShape>() {
            group.set_owner(id);
        }
        Ok(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonRecord, JsonRecordReader, ShapeWriter};
    use kurbo::{Affine, BezPath, Point, Rect};
    use serde_json::json;
    use std::any::Any;

    /// A sine wave between two x positions, registered by the application.
    #[derive(Debug, Clone, Default)]
    struct SinShape {
        origin: Point,
        length: f64,
        amplitude: f64,
    }

    impl SinShape {
        fn samples(&self) -> Vec<Point> {
            (0..=32)
                .map(|i| {
                    let t = i as f64 / 32.0;
                    Point::new(
                        self.origin.x + t * self.length,
                        self.origin.y + self.amplitude * (t * std::f64::consts::TAU).sin(),
                    )
                })
                .collect()
        }
    }

    impl ShapeKind for SinShape {
        fn type_name(&self) -> &'static str {
            "sin"
        }

        fn bounds(&self) -> Rect {
            crate::shapes::points_bounds(&self.samples())
        }

        fn hit_test(&self, point: Point, tolerance: f64) -> bool {
            crate::shapes::point_to_polyline_dist(point, &self.samples()) <= tolerance
        }

        fn to_path(&self) -> BezPath {
            let mut path = BezPath::new();
            for (i, p) in self.samples().into_iter().enumerate() {
                if i == 0 {
                    path.move_to(p);
                } else {
                    path.line_to(p);
                }
            }
            path
        }

        fn transform(&mut self, affine: Affine) {
            self.origin = affine * self.origin;
        }

        fn point_count(&self) -> usize {
            1
        }

        fn point(&self, index: usize) -> Option<Point> {
            (index == 0).then_some(self.origin)
        }

        fn set_point(&mut self, index: usize, point: Point) -> bool {
            if index == 0 {
                self.origin = point;
            }
            index == 0
        }

        fn save(&self, w: &mut dyn ShapeWriter) {
            w.write_float_array("points", &[self.origin.x, self.origin.y]);
            w.write_float("length", self.length);
            w.write_float("amplitude", self.amplitude);
        }

        fn load(&mut self, r: &dyn ShapeReader) -> StorageResult<()> {
            let coords = r.read_float_array("points");
            self.origin = Point::new(
                coords.first().copied().unwrap_or_default(),
                coords.get(1).copied().unwrap_or_default(),
            );
            self.length = r.read_float("length", 0.0);
            self.amplitude = r.read_float("amplitude", 0.0);
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

    #[test]
    fn test_builtins_registered() {
        let registry = ShapeRegistry::with_builtins();
        for name in ["line", "lines", "splines", "rect", "ellipse", "image", "group"] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(registry.create("sin").is_none());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let registry = ShapeRegistry::with_builtins();
        let value = json!({"type": "sin", "id": 1});
        let err = JsonRecordReader::read_shape(&value, &registry).unwrap_err();
        assert!(matches!(err, StorageError::UnknownShapeType(name) if name == "sin"));
    }

    #[test]
    fn test_custom_shape_roundtrip() {
        let mut registry = ShapeRegistry::with_builtins();
        registry.register_default::<SinShape>("sin");

        let mut shape = Shape::new(SinShape {
            origin: Point::new(5.0, 5.0),
            length: 100.0,
            amplitude: 10.0,
        });
        shape.id = 3;
        let value = JsonRecord::from_shape(&shape).into_value();
        let loaded = JsonRecordReader::read_shape(&value, &registry).unwrap();

        assert_eq!(loaded.type_name(), "sin");
        assert_eq!(loaded.id(), 3);
        let sin = loaded.downcast::<SinShape>().unwrap();
        assert!((sin.amplitude - 10.0).abs() < f64::EPSILON);
        assert!(loaded.hit_test(Point::new(5.0, 5.0), 1.0));
    }
}
