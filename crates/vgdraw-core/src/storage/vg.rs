//! The `.vg` document format.
//!
//! ```json
//! {"format": "vg", "version": 1, "id": "...", "name": "...", "changeCount": 3,
//!  "nextId": 4, "shapes": [{"type": "line", "id": 1, ...}]}
//! ```

use super::{JsonRecord, JsonRecordReader, Storage, StorageError, StorageResult};
use crate::container::Shapes;
use crate::document::DocumentData;
use crate::shapes::{Shape, ShapeId, ShapeRegistry};
use serde_json::{Map, Value, json};

pub const FORMAT: &str = "vg";
pub const VERSION: i64 = 1;
/// Conventional file extension for documents.
pub const EXTENSION: &str = "vg";

/// Records for a list of shapes, in order.
pub fn shapes_to_json<'a>(shapes: impl IntoIterator<Item = &'a Shape>) -> Value {
    Value::Array(
        shapes
            .into_iter()
            .map(|s| JsonRecord::from_shape(s).into_value())
            .collect(),
    )
}

pub fn shapes_from_json(value: &Value, registry: &ShapeRegistry) -> StorageResult<Vec<Shape>> {
    let items = value
        .as_array()
        .ok_or_else(|| StorageError::Format("shapes is not an array".into()))?;
    items
        .iter()
        .map(|item| JsonRecordReader::read_shape(item, registry))
        .collect()
}

pub fn document_to_json(doc: &DocumentData) -> Value {
    json!({
        "format": FORMAT,
        "version": VERSION,
        "id": doc.id,
        "name": doc.name,
        "changeCount": doc.change_count(),
        "nextId": doc.shapes.next_id(),
        "shapes": shapes_to_json(doc.shapes.iter()),
    })
}

fn header(value: &Value) -> StorageResult<&Map<String, Value>> {
    let map = value
        .as_object()
        .ok_or_else(|| StorageError::Format("document is not an object".into()))?;
    match map.get("format").and_then(Value::as_str) {
        Some(FORMAT) => {}
        other => return Err(StorageError::Format(format!("format {other:?}"))),
    }
    match map.get("version").and_then(Value::as_i64) {
        Some(v) if v <= VERSION => Ok(map),
        other => Err(StorageError::Format(format!("version {other:?}"))),
    }
}

/// Parse a document. Shape ids are kept; duplicates are renumbered. New ids
/// continue after both `nextId` and the highest stored id.
pub fn document_from_json(value: &Value, registry: &ShapeRegistry) -> StorageResult<DocumentData> {
    let map = header(value)?;
    let mut doc = DocumentData::default();
    if let Some(id) = map.get("id").and_then(Value::as_str) {
        doc.id = id.to_string();
    }
    if let Some(name) = map.get("name").and_then(Value::as_str) {
        doc.name = name.to_string();
    }
    let shapes = match map.get("shapes") {
        Some(list) => shapes_from_json(list, registry)?,
        None => Vec::new(),
    };
    let mut container = Shapes::new();
    if let Some(next) = map.get("nextId").and_then(Value::as_u64) {
        container.reserve_ids(ShapeId::try_from(next).unwrap_or(ShapeId::MAX));
    }
    for shape in shapes {
        container.add(shape);
    }
    container.set_change_count(map.get("changeCount").and_then(Value::as_u64).unwrap_or(0));
    doc.shapes = container;
    Ok(doc)
}

pub fn write_document(storage: &dyn Storage, key: &str, doc: &DocumentData) -> StorageResult<()> {
    let text = serde_json::to_string(&document_to_json(doc))?;
    storage.write(key, &text)
}

pub fn read_document(
    storage: &dyn Storage,
    key: &str,
    registry: &ShapeRegistry,
) -> StorageResult<DocumentData> {
    let text = storage.read(key)?;
    let value: Value = serde_json::from_str(&text)?;
    document_from_json(&value, registry)
}
