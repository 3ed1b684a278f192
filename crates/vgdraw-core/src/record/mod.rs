//! Undo history and session recording.
//!
//! Committed states are queued as [`RecordFrame`]s to a [`RecordEngine`]
//! worker, which persists them through a [`FrameLog`]. Undo logs keep a full
//! snapshot per step; recording logs keep the first document and then only
//! what changed. [`FramePlayer`] rebuilds any recorded frame.

mod engine;
mod frames;

pub use engine::{RecordCallback, RecordEngine, RecordTarget};
pub use frames::{FrameEntry, FrameLog, FramePlayer, PlayedFrame, INDEX_KEY};

use crate::document::ShapeDocument;
use crate::dynamic::DynamicShapeSet;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Reserved tick asking the worker to step the history back.
pub const UNDO_TICK: u32 = 0xFFFF_FF10;
/// Reserved tick asking the worker to step the history forward.
pub const REDO_TICK: u32 = 0xFFFF_FF20;

bitflags! {
    /// What a recorded frame contains.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FrameFlags: u32 {
        const ADD = 0x01;
        const EDIT = 0x02;
        const DEL = 0x04;
        const DYN = 0x08;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Full snapshots for undo and redo.
    Undo,
    /// Incremental frames for playback.
    Record,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Undo => f.write_str("undo"),
            RecordKind::Record => f.write_str("record"),
        }
    }
}

/// A state queued for persistence. Holding the frame keeps the document and
/// overlay snapshots alive; dropping it releases them.
#[derive(Debug, Clone)]
pub struct RecordFrame {
    pub tick: u32,
    pub change_count: u64,
    pub doc: Option<ShapeDocument>,
    pub shapes: Option<DynamicShapeSet>,
}

impl RecordFrame {
    pub fn new(tick: u32, doc: Option<ShapeDocument>, shapes: Option<DynamicShapeSet>) -> Self {
        let change_count = doc.as_ref().map(|d| d.change_count()).unwrap_or(0);
        Self {
            tick,
            change_count,
            doc,
            shapes,
        }
    }

    pub fn undo() -> Self {
        Self::new(UNDO_TICK, None, None)
    }

    pub fn redo() -> Self {
        Self::new(REDO_TICK, None, None)
    }

    /// Whether this is an undo or redo request rather than a state.
    pub fn is_history_request(&self) -> bool {
        self.tick == UNDO_TICK || self.tick == REDO_TICK
    }

    /// Overlay-only frames may be skipped when newer frames are waiting.
    pub fn is_dynamic_only(&self) -> bool {
        self.doc.is_none() && self.shapes.is_some() && !self.is_history_request()
    }
}

/// Metadata of a frame that reached the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub filename: String,
    pub tick: u32,
    pub index: usize,
    pub flags: FrameFlags,
}

/// Milliseconds since recording began, excluding paused time.
#[derive(Debug, Clone)]
pub struct RecordClock {
    start: Instant,
    paused_at: Option<Instant>,
    paused: Duration,
}

impl Default for RecordClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            paused_at: None,
            paused: Duration::ZERO,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn pause(&mut self) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(Instant::now());
        true
    }

    pub fn resume(&mut self) -> bool {
        let Some(at) = self.paused_at.take() else {
            return false;
        };
        self.paused += at.elapsed();
        true
    }

    /// Current tick. Frozen while paused.
    pub fn tick(&self) -> u32 {
        let now = self.paused_at.unwrap_or_else(Instant::now);
        let elapsed = now.saturating_duration_since(self.start).saturating_sub(self.paused);
        // Stay clear of the reserved history ticks.
        elapsed.as_millis().min(UNDO_TICK as u128 - 1) as u32
    }
}
