//! Frame files and the recording index.

use super::{FrameFlags, RecordFrame, RecordKind, RecordedFrame};
use crate::container::Shapes;
use crate::document::{DocumentData, ShapeDocument};
use crate::shapes::{Shape, ShapeId, ShapeRegistry};
use crate::storage::vg::{self, shapes_from_json, shapes_to_json};
use crate::storage::{Storage, StorageError, StorageResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Key of the recording index.
pub const INDEX_KEY: &str = "records.json";

fn frame_key(index: usize) -> String {
    format!("{index}.{}", vg::EXTENSION)
}

/// One line of the recording index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEntry {
    pub tick: u32,
    pub flags: FrameFlags,
    #[serde(rename = "changeCount", default)]
    pub change_count: u64,
}

/// Persists frames of one kind into a storage backend.
pub struct FrameLog {
    kind: RecordKind,
    storage: Arc<dyn Storage>,
    /// Frames currently in effect. For undo logs this is the history cursor.
    file_count: usize,
    /// Frames on disk, including any redo tail.
    max_count: usize,
    /// Last recorded document, the base for the next diff.
    last_doc: Option<ShapeDocument>,
    entries: Vec<FrameEntry>,
}

impl std::fmt::Debug for FrameLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLog")
            .field("kind", &self.kind)
            .field("file_count", &self.file_count)
            .field("max_count", &self.max_count)
            .finish()
    }
}

impl FrameLog {
    pub fn new(kind: RecordKind, storage: Arc<dyn Storage>) -> Self {
        Self {
            kind,
            storage,
            file_count: 0,
            max_count: 0,
            last_doc: None,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    pub fn can_undo(&self) -> bool {
        self.kind == RecordKind::Undo && self.file_count > 1
    }

    pub fn can_redo(&self) -> bool {
        self.kind == RecordKind::Undo && self.file_count < self.max_count
    }

    /// Persist one frame. Returns `None` when the frame carried nothing new.
    pub fn record(&mut self, frame: &RecordFrame) -> StorageResult<Option<RecordedFrame>> {
        match self.kind {
            RecordKind::Undo => self.record_snapshot(frame),
            RecordKind::Record => self.record_diff(frame),
        }
    }

    fn record_snapshot(&mut self, frame: &RecordFrame) -> StorageResult<Option<RecordedFrame>> {
        let Some(doc) = frame.doc.as_ref() else {
            return Ok(None);
        };
        let index = self.file_count;
        let filename = frame_key(index);
        vg::write_document(self.storage.as_ref(), &filename, doc)?;
        // A new step truncates the redo tail.
        for stale in index + 1..self.max_count {
            self.storage.delete(&frame_key(stale))?;
        }
        self.file_count += 1;
        self.max_count = self.file_count;
        debug!("undo frame {index} at change {}", doc.change_count());
        Ok(Some(RecordedFrame {
            filename,
            tick: frame.tick,
            index,
            flags: FrameFlags::EDIT,
        }))
    }

    fn record_diff(&mut self, frame: &RecordFrame) -> StorageResult<Option<RecordedFrame>> {
        let mut flags = FrameFlags::empty();
        let mut value = json!({
            "format": vg::FORMAT,
            "version": vg::VERSION,
            "tick": frame.tick,
        });

        match (&frame.doc, &self.last_doc) {
            (Some(doc), None) => {
                value = vg::document_to_json(doc);
                value["tick"] = json!(frame.tick);
                if !doc.shapes.is_empty() {
                    flags |= FrameFlags::ADD;
                }
            }
            (Some(doc), Some(last)) if !doc.ptr_eq(last) => {
                let diff = diff(&last.shapes, &doc.shapes);
                flags |= diff.flags();
                value["changeCount"] = json!(frame.change_count);
                value["shapes"] = shapes_to_json(diff.changed);
                value["deleted"] = json!(diff.deleted);
            }
            _ => {}
        }
        if let Some(shapes) = frame.shapes.as_ref().filter(|s| !s.shapes().is_empty()) {
            flags |= FrameFlags::DYN;
            value["dynamic"] = shapes_to_json(shapes.shapes());
        }

        let first = self.file_count == 0;
        if flags.is_empty() && !first {
            return Ok(None);
        }
        if first && frame.doc.is_none() {
            debug!("recording needs a document first, frame {} skipped", frame.tick);
            return Ok(None);
        }

        let index = self.file_count;
        let filename = frame_key(index);
        self.storage.write(&filename, &serde_json::to_string(&value)?)?;
        if let Some(doc) = &frame.doc {
            self.last_doc = Some(doc.clone());
        }
        self.entries.push(FrameEntry {
            tick: frame.tick,
            flags,
            change_count: frame.change_count,
        });
        self.storage.write(INDEX_KEY, &serde_json::to_string(&self.entries)?)?;
        self.file_count += 1;
        self.max_count = self.file_count;
        Ok(Some(RecordedFrame {
            filename,
            tick: frame.tick,
            index,
            flags,
        }))
    }

    /// Step back and load the snapshot now in effect.
    pub fn undo(&mut self, registry: &ShapeRegistry) -> StorageResult<Option<DocumentData>> {
        if !self.can_undo() {
            return Ok(None);
        }
        let doc = vg::read_document(self.storage.as_ref(), &frame_key(self.file_count - 2), registry)?;
        self.file_count -= 1;
        Ok(Some(doc))
    }

    /// Step forward and load the snapshot now in effect.
    pub fn redo(&mut self, registry: &ShapeRegistry) -> StorageResult<Option<DocumentData>> {
        if !self.can_redo() {
            return Ok(None);
        }
        let doc = vg::read_document(self.storage.as_ref(), &frame_key(self.file_count), registry)?;
        self.file_count += 1;
        Ok(Some(doc))
    }
}

struct Diff<'a> {
    /// New or changed shapes, in z-order.
    changed: Vec<&'a Shape>,
    added: bool,
    edited: bool,
    deleted: Vec<ShapeId>,
}

impl Diff<'_> {
    fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::ADD, self.added);
        flags.set(FrameFlags::EDIT, self.edited);
        flags.set(FrameFlags::DEL, !self.deleted.is_empty());
        flags
    }
}

/// Compare snapshots by shape identity: a shape copied on write is a change.
fn diff<'a>(old: &Shapes, new: &'a Shapes) -> Diff<'a> {
    let mut out = Diff {
        changed: Vec::new(),
        added: false,
        edited: false,
        deleted: Vec::new(),
    };
    for id in new.ids() {
        let Some(shape) = new.get_shared(id) else {
            continue;
        };
        match old.get_shared(id) {
            Some(prev) if Arc::ptr_eq(prev, shape) && prev.version() == shape.version() => continue,
            Some(_) => out.edited = true,
            None => out.added = true,
        }
        out.changed.push(shape.as_ref());
    }
    out.deleted = old.ids().into_iter().filter(|id| !new.contains(*id)).collect();
    out
}

/// Document and overlay at one recorded frame.
#[derive(Debug, Clone)]
pub struct PlayedFrame {
    pub index: usize,
    pub entry: FrameEntry,
    pub doc: DocumentData,
    pub dynamic: Vec<Shape>,
}

/// Reads a recording back.
pub struct FramePlayer {
    storage: Arc<dyn Storage>,
    entries: Vec<FrameEntry>,
}

impl FramePlayer {
    pub fn open(storage: Arc<dyn Storage>) -> StorageResult<Self> {
        let entries: Vec<FrameEntry> = serde_json::from_str(&storage.read(INDEX_KEY)?)?;
        Ok(Self { storage, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    fn load(&self, index: usize) -> StorageResult<Value> {
        Ok(serde_json::from_str(&self.storage.read(&frame_key(index))?)?)
    }

    /// Rebuild the state at `index` by applying every diff up to it.
    pub fn frame(&self, index: usize, registry: &ShapeRegistry) -> StorageResult<PlayedFrame> {
        let entry = *self
            .entries
            .get(index)
            .ok_or_else(|| StorageError::NotFound(frame_key(index)))?;

        let mut value = self.load(0)?;
        let mut doc = vg::document_from_json(&value, registry)?;
        for i in 1..=index {
            value = self.load(i)?;
            apply_diff(&mut doc, &value, registry)?;
        }
        let dynamic = match value.get("dynamic") {
            Some(list) => shapes_from_json(list, registry)?,
            None => Vec::new(),
        };
        Ok(PlayedFrame {
            index,
            entry,
            doc,
            dynamic,
        })
    }
}

fn apply_diff(doc: &mut DocumentData, value: &Value, registry: &ShapeRegistry) -> StorageResult<()> {
    if let Some(deleted) = value.get("deleted").and_then(Value::as_array) {
        let ids: Vec<ShapeId> = deleted
            .iter()
            .filter_map(Value::as_u64)
            .map(|id| id as ShapeId)
            .collect();
        doc.shapes.remove_all(&ids);
    }
    if let Some(list) = value.get("shapes") {
        for shape in shapes_from_json(list, registry)? {
            let id = shape.id();
            if !doc.shapes.replace(id, shape.clone()) {
                let added = doc.shapes.add(shape);
                if added != id {
                    warn!("recorded shape {id} renumbered to {added}");
                }
            }
        }
    }
    if let Some(count) = value.get("changeCount").and_then(Value::as_u64) {
        doc.shapes.set_change_count(count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::{DynamicData, DynamicShapeSet};
    use crate::shapes::LineShape;
    use crate::storage::{FileStorage, MemoryStorage};
    use kurbo::{Affine, Point};

    fn line(x: f64) -> Shape {
        Shape::new(LineShape::new(Point::new(x, 0.0), Point::new(x, 10.0)))
    }

    fn commit(doc: &mut ShapeDocument, edit: impl FnOnce(&mut Shapes)) -> ShapeDocument {
        let data = doc.make_mut();
        edit(&mut data.shapes);
        data.shapes.bump();
        doc.clone()
    }

    #[test]
    fn test_undo_redo_cursor() {
        let registry = ShapeRegistry::with_builtins();
        let mut log = FrameLog::new(RecordKind::Undo, Arc::new(MemoryStorage::new()));
        let mut doc = ShapeDocument::new();

        log.record(&RecordFrame::new(0, Some(doc.clone()), None)).unwrap();
        assert!(!log.can_undo());
        let one = commit(&mut doc, |s| {
            s.add(line(0.0));
        });
        log.record(&RecordFrame::new(1, Some(one), None)).unwrap();
        let two = commit(&mut doc, |s| {
            s.add(line(5.0));
        });
        log.record(&RecordFrame::new(2, Some(two), None)).unwrap();
        assert_eq!((log.file_count(), log.max_count()), (3, 3));

        let back = log.undo(&registry).unwrap().unwrap();
        assert_eq!(back.shapes.len(), 1);
        assert!(log.can_redo());
        let back = log.undo(&registry).unwrap().unwrap();
        assert_eq!(back.shapes.len(), 0);
        assert!(log.undo(&registry).unwrap().is_none());

        let forward = log.redo(&registry).unwrap().unwrap();
        assert_eq!(forward.shapes.len(), 1);
        let back = log.undo(&registry).unwrap().unwrap();

        // A new edit drops the redo tail.
        let mut branch = ShapeDocument::from_data(back);
        let edited = commit(&mut branch, |s| {
            s.add(line(9.0));
            s.add(line(12.0));
        });
        log.record(&RecordFrame::new(3, Some(edited), None)).unwrap();
        assert!(!log.can_redo());
        assert_eq!((log.file_count(), log.max_count()), (2, 2));
        assert!(!log.storage().exists("2.vg").unwrap());
    }

    #[test]
    fn test_record_diffs_and_playback() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let registry = ShapeRegistry::with_builtins();
        let mut log = FrameLog::new(RecordKind::Record, Arc::clone(&storage));
        let mut doc = ShapeDocument::new();
        let first = commit(&mut doc, |s| {
            s.add(line(0.0));
            s.add(line(5.0));
        });
        let ids = first.shapes.ids();

        let f0 = log.record(&RecordFrame::new(0, Some(first.clone()), None)).unwrap().unwrap();
        assert_eq!(f0.flags, FrameFlags::ADD);

        // Unchanged document and no overlay: nothing recorded.
        assert!(log.record(&RecordFrame::new(10, Some(first), None)).unwrap().is_none());

        let moved = commit(&mut doc, |s| {
            s.find_mut(ids[0]).unwrap().transform(Affine::translate((3.0, 0.0)));
            s.remove(ids[1]);
        });
        let f1 = log.record(&RecordFrame::new(20, Some(moved), None)).unwrap().unwrap();
        assert_eq!(f1.flags, FrameFlags::EDIT | FrameFlags::DEL);

        let overlay = DynamicShapeSet::new(DynamicData {
            shapes: vec![line(50.0)],
            ..DynamicData::default()
        });
        let f2 = log.record(&RecordFrame::new(30, None, Some(overlay))).unwrap().unwrap();
        assert_eq!(f2.flags, FrameFlags::DYN);
        assert_eq!(f2.filename, "2.vg");

        let player = FramePlayer::open(storage).unwrap();
        assert_eq!(player.len(), 3);
        assert_eq!(player.entries()[1].tick, 20);

        let start = player.frame(0, &registry).unwrap();
        assert_eq!(start.doc.shapes.ids(), ids);
        let end = player.frame(2, &registry).unwrap();
        assert_eq!(end.doc.shapes.ids(), vec![ids[0]]);
        assert_eq!(end.doc.shapes.get(ids[0]).unwrap().point(0), Some(Point::new(3.0, 0.0)));
        assert_eq!(end.doc.change_count(), 2);
        assert_eq!(end.dynamic.len(), 1);
    }
}
