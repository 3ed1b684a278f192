//! Touch scripts and their replay against a kernel view.
//!
//! A script is JSON:
//!
//! ```json
//! {
//!   "config": { "hit_tolerance": 12 },
//!   "viewport": { "width": 800, "height": 600 },
//!   "command": "line",
//!   "params": { "lineWidth": 2 },
//!   "events": [
//!     { "type": "down", "x": 10, "y": 10 },
//!     { "type": "move", "x": 60, "y": 60 },
//!     { "type": "up", "x": 120, "y": 120, "t": 400 },
//!     { "type": "undo" }
//!   ]
//! }
//! ```
//!
//! Event times are milliseconds; an event without `t` happens one frame
//! after the previous one.

use kurbo::{Point, Size};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use vgdraw_core::config::KernelConfig;
use vgdraw_core::gesture::GestureDispatcher;
use vgdraw_core::storage::{FileStorage, MemoryStorage, StorageError};
use vgdraw_core::view::CoreView;
use vgdraw_render::{RecordingSurface, RendererError, ViewAdapter};

/// Milliseconds between events that carry no time.
const FRAME_MS: u64 = 16;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Render error: {0}")]
    Render(#[from] RendererError),
    #[error("Unknown command: {0}")]
    Command(String),
    #[error("Could not load {}", .0.display())]
    Load(PathBuf),
    #[error("Could not save {}", .0.display())]
    Save(PathBuf),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub config: KernelConfig,
    #[serde(default)]
    pub viewport: Viewport,
    /// `.vg` document loaded before the first event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub events: Vec<Step>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// One timed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<u64>,
    #[serde(flatten)]
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Down {
        x: f64,
        y: f64,
        #[serde(default = "one_finger")]
        fingers: usize,
    },
    /// A move sample. A second point makes it a two-finger move.
    Move {
        x: f64,
        y: f64,
        #[serde(default)]
        x2: Option<f64>,
        #[serde(default)]
        y2: Option<f64>,
    },
    Up {
        x: f64,
        y: f64,
        #[serde(default)]
        x2: Option<f64>,
        #[serde(default)]
        y2: Option<f64>,
    },
    /// The system cancelled the touch.
    Cancel { x: f64, y: f64 },
    Tap { x: f64, y: f64 },
    DoubleTap { x: f64, y: f64 },
    /// Platform long press during the current touch.
    LongPress { x: f64, y: f64 },
    Undo,
    Redo,
    SetCommand {
        name: String,
        #[serde(default)]
        params: Value,
    },
}

fn one_finger() -> usize {
    1
}

fn second_point(p: Point, x2: Option<f64>, y2: Option<f64>) -> (usize, Point) {
    match (x2, y2) {
        (Some(x), Some(y)) => (2, Point::new(x, y)),
        _ => (1, p),
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    pub events: usize,
    /// Events the view accepted.
    pub handled: usize,
    pub shapes: usize,
    pub change_count: u64,
    pub frames: usize,
}

/// A view with one offscreen surface, driven by script events.
pub struct Replay {
    adapter: Arc<ViewAdapter>,
    dispatcher: GestureDispatcher,
    frames: vgdraw_render::FrameSink,
    clock: u64,
    events: usize,
    handled: usize,
}

impl Replay {
    /// Build the view, attach the surface and apply the script's document
    /// and initial command.
    pub fn new(script: &Script) -> Result<Self, ScriptError> {
        let config = script.config.clone();
        let size = Size::new(script.viewport.width, script.viewport.height);
        let view = CoreView::new(config.clone());
        view.set_viewport(size);

        if let Some(path) = &script.document {
            if !view.load_from_path(path) {
                return Err(ScriptError::Load(path.clone()));
            }
        }

        let adapter = ViewAdapter::new(view);
        let surface = RecordingSurface::new(size);
        let frames = surface.frames();
        adapter.attach_surface("main", Box::new(surface))?;
        if !adapter.start_undo(Arc::new(MemoryStorage::new())) {
            warn!("replay runs without undo");
        }
        let timeout = Duration::from_millis(config.stop_timeout_ms);
        if !adapter.wait_idle(timeout) {
            warn!("first frame still pending after {timeout:?}");
        }

        if let Some(name) = &script.command {
            let params = script.params.clone().unwrap_or(Value::Null);
            if !adapter.view().set_command_params(name, &params) {
                return Err(ScriptError::Command(name.clone()));
            }
        }

        Ok(Self {
            adapter,
            dispatcher: GestureDispatcher::new(config.gesture),
            frames,
            clock: 0,
            events: 0,
            handled: 0,
        })
    }

    pub fn view(&self) -> &Arc<CoreView> {
        self.adapter.view()
    }

    /// Record the session into `dir` as a frame log.
    pub fn record_to(&self, dir: impl Into<PathBuf>) -> Result<bool, ScriptError> {
        let storage = FileStorage::new(dir)?;
        Ok(self.adapter.start_record(Arc::new(storage)))
    }

    pub fn run(&mut self, steps: &[Step]) {
        for step in steps {
            self.clock = step.t.unwrap_or(self.clock + FRAME_MS);
            let handled = self.apply(&step.event);
            debug!("{}ms {:?} -> {handled}", self.clock, step.event);
            self.events += 1;
            if handled {
                self.handled += 1;
            }
        }
    }

    fn apply(&mut self, event: &Event) -> bool {
        let sink: &CoreView = self.adapter.view();
        let now = self.clock;
        let dispatcher = &mut self.dispatcher;
        match event {
            Event::Down { x, y, fingers } => {
                dispatcher.touch_down(now, *fingers, Point::new(*x, *y));
                true
            }
            Event::Move { x, y, x2, y2 } => {
                let p = Point::new(*x, *y);
                let (fingers, p2) = second_point(p, *x2, *y2);
                dispatcher.touch_moved(sink, now, fingers, p, p2)
            }
            Event::Up { x, y, x2, y2 } => {
                let p = Point::new(*x, *y);
                let (_, p2) = second_point(p, *x2, *y2);
                dispatcher.touch_ended(sink, now, true, p, p2)
            }
            Event::Cancel { x, y } => {
                let p = Point::new(*x, *y);
                dispatcher.touch_ended(sink, now, false, p, p)
            }
            Event::Tap { x, y } => {
                let p = Point::new(*x, *y);
                dispatcher.touch_down(now, 1, p);
                dispatcher.touch_ended(sink, now, true, p, p);
                dispatcher.single_tap_confirmed(sink)
            }
            Event::DoubleTap { x, y } => {
                let p = Point::new(*x, *y);
                dispatcher.touch_down(now, 1, p);
                dispatcher.touch_ended(sink, now, true, p, p);
                dispatcher.double_tap(sink, p)
            }
            Event::LongPress { x, y } => dispatcher.long_press(sink, Point::new(*x, *y)),
            Event::Undo => self.step_history(true),
            Event::Redo => self.step_history(false),
            Event::SetCommand { name, params } => {
                let ok = self.adapter.view().set_command_params(name, params);
                if !ok {
                    warn!("command {name} not set");
                }
                ok
            }
        }
    }

    /// Undo and redo run on the history worker; wait for the result.
    fn step_history(&self, back: bool) -> bool {
        let view = self.adapter.view();
        let before = view.change_count();
        let requested = if back { view.undo() } else { view.redo() };
        if !requested {
            return false;
        }
        let deadline = Instant::now() + Duration::from_millis(view.config().stop_timeout_ms);
        while view.change_count() == before {
            if Instant::now() >= deadline {
                debug!("history step had no effect");
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    pub fn summary(&self) -> ReplaySummary {
        let view = self.adapter.view();
        ReplaySummary {
            events: self.events,
            handled: self.handled,
            shapes: view.shape_count(),
            change_count: view.change_count(),
            frames: self.frames.lock().len(),
        }
    }

    /// Write the document to `output`, then stop the view and its workers.
    pub fn finish(self, output: &Path) -> Result<ReplaySummary, ScriptError> {
        let timeout = Duration::from_millis(self.view().config().stop_timeout_ms);
        self.adapter.wait_idle(timeout);
        let summary = self.summary();
        let saved = self.view().save_to_path(output);
        if self.view().is_recording() {
            self.adapter.stop_record();
        }
        if !self.adapter.stop() {
            warn!("workers still running after stop");
        }
        if !saved {
            return Err(ScriptError::Save(output.to_path_buf()));
        }
        info!(
            "{} of {} events handled, {} shapes written to {}",
            summary.handled,
            summary.events,
            summary.shapes,
            output.display()
        );
        Ok(summary)
    }
}

/// Replay the script at `script` and write the document to `output`.
pub fn run_file(
    script: &Path,
    output: &Path,
    record: Option<&Path>,
) -> Result<ReplaySummary, ScriptError> {
    let parsed = Script::load(script)?;
    let mut replay = Replay::new(&parsed)?;
    if let Some(dir) = record {
        if !replay.record_to(dir)? {
            warn!("recording to {} not started", dir.display());
        }
    }
    replay.run(&parsed.events);
    replay.finish(output)
}
