//! Storage abstraction for documents and frame logs.
//!
//! Shapes persist themselves through the keyed [`ShapeWriter`] / [`ShapeReader`]
//! capability; [`vg`] assembles those records into `.vg` documents, and a
//! [`Storage`] backend holds the resulting text under a file-like key.

mod file;
mod json;
mod memory;
pub mod vg;

pub use file::FileStorage;
pub use json::{JsonRecord, JsonRecordReader};
pub use memory::MemoryStorage;

use crate::shapes::Shape;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Unknown shape type: {0}")]
    UnknownShapeType(String),
    #[error("Unsupported format: {0}")]
    Format(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Keyed field writer used by shapes to persist themselves.
pub trait ShapeWriter {
    fn write_int(&mut self, key: &str, value: i64);
    fn write_float(&mut self, key: &str, value: f64);
    fn write_bool(&mut self, key: &str, value: bool);
    fn write_string(&mut self, key: &str, value: &str);
    fn write_float_array(&mut self, key: &str, values: &[f64]);
    /// Write nested shape records (groups).
    fn write_shapes(&mut self, key: &str, shapes: &[Shape]);
}

/// Keyed field reader, the counterpart of [`ShapeWriter`].
pub trait ShapeReader {
    fn read_int(&self, key: &str, default: i64) -> i64;
    fn read_float(&self, key: &str, default: f64) -> f64;
    fn read_bool(&self, key: &str, default: bool) -> bool;
    fn read_string(&self, key: &str) -> Option<String>;
    fn read_float_array(&self, key: &str) -> Vec<f64>;
    fn read_shapes(&self, key: &str) -> StorageResult<Vec<Shape>>;
    fn has_key(&self, key: &str) -> bool;
}

/// Trait for text storage backends.
///
/// Keys are file names (`doc.vg`, `3.vg`, `records.json`).
/// Implementations must be usable from worker threads.
pub trait Storage: Send + Sync {
    /// Write an entry, replacing any previous contents.
    fn write(&self, key: &str, contents: &str) -> StorageResult<()>;

    /// Read an entry.
    fn read(&self, key: &str) -> StorageResult<String>;

    /// Delete an entry. Deleting a missing entry is not an error.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// List all keys.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Check if an entry exists.
    fn exists(&self, key: &str) -> StorageResult<bool>;
}
