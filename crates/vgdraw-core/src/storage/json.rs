//! JSON-object implementation of the keyed shape record capability.

use super::{ShapeReader, ShapeWriter, StorageError, StorageResult};
use crate::shapes::{Shape, ShapeRegistry};
use serde_json::{Map, Value};

/// A shape record being written.
#[derive(Debug, Clone, Default)]
pub struct JsonRecord {
    map: Map<String, Value>,
}

impl JsonRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a shape into a fresh record.
    pub fn from_shape(shape: &Shape) -> Self {
        let mut record = Self::new();
        shape.save(&mut record);
        record
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.map)
    }
}

impl ShapeWriter for JsonRecord {
    fn write_int(&mut self, key: &str, value: i64) {
        self.map.insert(key.to_string(), Value::from(value));
    }

    fn write_float(&mut self, key: &str, value: f64) {
        self.map.insert(key.to_string(), Value::from(value));
    }

    fn write_bool(&mut self, key: &str, value: bool) {
        self.map.insert(key.to_string(), Value::from(value));
    }

    fn write_string(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_string(), Value::from(value));
    }

    fn write_float_array(&mut self, key: &str, values: &[f64]) {
        self.map.insert(key.to_string(), Value::from(values.to_vec()));
    }

    fn write_shapes(&mut self, key: &str, shapes: &[Shape]) {
        let records: Vec<Value> = shapes
            .iter()
            .map(|s| JsonRecord::from_shape(s).into_value())
            .collect();
        self.map.insert(key.to_string(), Value::Array(records));
    }
}

/// Reads a shape record, resolving nested shape types through a registry.
pub struct JsonRecordReader<'a> {
    map: &'a Map<String, Value>,
    registry: &'a ShapeRegistry,
}

impl<'a> JsonRecordReader<'a> {
    pub fn new(value: &'a Value, registry: &'a ShapeRegistry) -> StorageResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| StorageError::Serialization("shape record is not an object".into()))?;
        Ok(Self { map, registry })
    }

    /// Read one shape from its record.
    pub fn read_shape(value: &Value, registry: &ShapeRegistry) -> StorageResult<Shape> {
        let reader = JsonRecordReader::new(value, registry)?;
        registry.load_shape(&reader)
    }
}

impl ShapeReader for JsonRecordReader<'_> {
    fn read_int(&self, key: &str, default: i64) -> i64 {
        self.map.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    fn read_float(&self, key: &str, default: f64) -> f64 {
        self.map.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    fn read_bool(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    fn read_string(&self, key: &str) -> Option<String> {
        self.map.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn read_float_array(&self, key: &str) -> Vec<f64> {
        self.map
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    }

    fn read_shapes(&self, key: &str) -> StorageResult<Vec<Shape>> {
        let Some(items) = self.map.get(key).and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        items
            .iter()
            .map(|item| JsonRecordReader::read_shape(item, self.registry))
            .collect()
    }

    fn has_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_fields() {
        let mut record = JsonRecord::new();
        record.write_int("id", 7);
        record.write_float("w", 1.5);
        record.write_bool("closed", true);
        record.write_string("type", "line");
        record.write_float_array("points", &[1.0, 2.0]);

        let value = record.into_value();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["type"], json!("line"));
        assert_eq!(value["points"], json!([1.0, 2.0]));
        assert_eq!(value["closed"], json!(true));
    }

    #[test]
    fn test_reader_defaults() {
        let registry = ShapeRegistry::with_builtins();
        let value = json!({"id": 3, "w": 2.5, "points": [1.0, "x", 2.0]});
        let reader = JsonRecordReader::new(&value, &registry).unwrap();

        assert_eq!(reader.read_int("id", 0), 3);
        assert_eq!(reader.read_int("missing", -1), -1);
        assert!((reader.read_float("w", 0.0) - 2.5).abs() < f64::EPSILON);
        assert_eq!(reader.read_float_array("points"), vec![1.0, 2.0]);
        assert!(reader.read_string("type").is_none());
        assert!(reader.read_shapes("children").unwrap().is_empty());
        assert!(reader.has_key("w"));
    }

    #[test]
    fn test_reader_rejects_non_object() {
        let registry = ShapeRegistry::with_builtins();
        let value = json!([1, 2]);
        assert!(JsonRecordReader::new(&value, &registry).is_err());
    }
}
