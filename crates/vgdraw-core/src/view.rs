//! The kernel view.
//!
//! A [`CoreView`] owns everything one drawing surface edits: the back and
//! front documents, the overlay, the active command and the camera. All of it
//! sits behind one lock that is only held for bookkeeping. Gesture handling
//! collects what a command asked for under the lock, publishes a new front
//! document when the back one changed, and then calls the [`ViewHost`] and
//! fires notifications after the lock is released.
//!
//! Render workers read through [`CoreView::acquire_snapshot`] and draw with
//! no lock held.

use crate::camera::{Camera, Pinch};
use crate::commands::{Command, CommandEnv, CommandManager, Effects, Motion};
use crate::config::KernelConfig;
use crate::document::{DocumentData, ShapeDocument};
use crate::dynamic::DynamicShapeSet;
use crate::gesture::{GestureKind, GestureSink, GestureState};
use crate::graphics::{GraphicsContext, GraphicsPool};
use crate::notify::{Notification, Notifier};
use crate::record::{FrameLog, RecordClock, RecordFrame, RecordKind, RecordTarget, RecordedFrame};
use crate::shapes::{
    Argb, ArrowHead, ContextMask, LineStyle, ShapeContext, ShapeId, ShapeKind, ShapeRegistry,
};
use crate::storage::{FileStorage, Storage, StorageError, StorageResult, vg};
use kurbo::{Point, Size};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Receives repaint requests from a view. Implemented by the render side.
pub trait ViewHost: Send + Sync {
    /// Repaint the document layer. `changed` is false when only the camera
    /// moved.
    fn regen_all(&self, changed: bool);
    /// Paint one newly appended shape over the current document layer.
    fn regen_append(&self, id: ShapeId);
    /// Repaint the overlay.
    fn redraw(&self);
    /// An undo or redo replaced the document. Repaint it and log it to the
    /// session recording, but not as a new undo step.
    fn history_restored(&self) {
        self.regen_all(false);
    }
    /// Queue an undo step. Returns false if the host keeps no history.
    fn request_undo(&self) -> bool {
        false
    }
    fn request_redo(&self) -> bool {
        false
    }
}

/// Who owns the current one-finger drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Handler {
    #[default]
    None,
    Command,
    /// The view itself pans.
    View,
}

struct ViewState {
    back: ShapeDocument,
    front: ShapeDocument,
    dynamic: DynamicShapeSet,
    commands: CommandManager,
    /// Defaults for new shapes.
    context: ShapeContext,
    camera: Camera,
    viewport: Size,
    handler: Handler,
    motion: Motion,
    pan_last: Point,
    pinch: Option<Pinch>,
}

enum Regen {
    All(bool),
    Append(Vec<ShapeId>),
    /// The document came from the undo log.
    Restored,
}

/// Work left for after the lock is released.
#[derive(Default)]
struct Outcome {
    regen: Option<Regen>,
    redraw: bool,
    notifications: Vec<Notification>,
}

impl Outcome {
    fn camera_moved(&mut self) {
        if self.regen.is_none() {
            self.regen = Some(Regen::All(false));
        }
    }
}

struct Recording {
    log: FrameLog,
    clock: RecordClock,
}

/// Everything a render pass needs, taken in one critical section.
#[derive(Debug)]
pub struct Snapshot {
    pub doc: ShapeDocument,
    pub dynamic: DynamicShapeSet,
    pub camera: Camera,
    pub viewport: Size,
    /// `None` when the graphics pool is exhausted.
    pub graphics: Option<GraphicsContext>,
}

pub struct CoreView {
    id: Uuid,
    config: KernelConfig,
    state: Mutex<ViewState>,
    notifier: Notifier,
    host: RwLock<Option<Weak<dyn ViewHost>>>,
    pool: Arc<GraphicsPool>,
    registry: RwLock<ShapeRegistry>,
    undo_log: Mutex<Option<FrameLog>>,
    recording: Mutex<Option<Recording>>,
    stopping: AtomicBool,
}

impl std::fmt::Debug for CoreView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreView")
            .field("id", &self.id)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

impl CoreView {
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Self::with_document(config, DocumentData::default())
    }

    pub fn with_document(config: KernelConfig, data: DocumentData) -> Arc<Self> {
        let doc = ShapeDocument::from_data(data);
        let state = ViewState {
            back: doc.clone(),
            front: doc,
            dynamic: DynamicShapeSet::empty(),
            commands: CommandManager::with_builtins(&config.default_draw_command),
            context: ShapeContext::default(),
            camera: Camera::from_config(&config),
            viewport: Size::new(800.0, 600.0),
            handler: Handler::None,
            motion: Motion {
                tolerance: config.hit_tolerance,
                ..Motion::default()
            },
            pan_last: Point::ZERO,
            pinch: None,
        };
        let view = Arc::new(Self {
            id: Uuid::new_v4(),
            pool: GraphicsPool::new(config.graphics_pool_size),
            config,
            state: Mutex::new(state),
            notifier: Notifier::new(),
            host: RwLock::new(None),
            registry: RwLock::new(ShapeRegistry::with_builtins()),
            undo_log: Mutex::new(None),
            recording: Mutex::new(None),
            stopping: AtomicBool::new(false),
        });
        info!("view {} created", view.id);
        view
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn set_host(&self, host: Option<Weak<dyn ViewHost>>) {
        *self.host.write() = host;
    }

    fn host(&self) -> Option<Arc<dyn ViewHost>> {
        self.host.read().as_ref().and_then(Weak::upgrade)
    }

    /// Register a custom shape type for loading.
    pub fn register_shape<F>(&self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn ShapeKind> + Send + Sync + 'static,
    {
        self.registry.write().register(type_name, factory);
    }

    /// Register a custom command.
    pub fn register_command<F>(&self, name: &str, drawing: bool, factory: F)
    where
        F: Fn() -> Box<dyn Command> + Send + Sync + 'static,
    {
        self.state.lock().commands.register(name, drawing, factory);
    }

    // Lock-side plumbing.

    fn run_command<R: Default>(
        &self,
        st: &mut ViewState,
        f: impl FnOnce(&mut (dyn Command + 'static), &mut CommandEnv<'_>) -> R,
    ) -> (R, Effects) {
        let ViewState {
            back,
            context,
            commands,
            ..
        } = st;
        let mut env = CommandEnv::new(back, context, &self.config);
        let result = match commands.current_mut() {
            Some(cmd) => f(cmd, &mut env),
            None => R::default(),
        };
        (result, env.effects)
    }

    fn build_dynamic(st: &ViewState) -> DynamicShapeSet {
        match st.commands.current() {
            Some(cmd) => DynamicShapeSet::new(cmd.dynamic(&st.back.shapes)),
            None => DynamicShapeSet::empty(),
        }
    }

    /// Turn command effects into a published state. `gesture` is the gesture
    /// state that produced them, if any.
    fn settle(&self, st: &mut ViewState, mut effects: Effects, gesture: Option<GestureState>) -> Outcome {
        if let Some((name, params)) = effects.switch_to.take() {
            let ViewState {
                back,
                context,
                commands,
                ..
            } = &mut *st;
            let mut env = CommandEnv::new(back, context, &self.config);
            commands.set_command(&mut env, &name, &params);
            effects.absorb(env.effects);
            st.handler = Handler::None;
        }

        let mut out = Outcome::default();
        out.notifications.append(&mut effects.notifications);
        if effects.modified {
            let count = st.back.make_mut().shapes.bump();
            st.front = st.back.clone();
            out.regen = Some(if effects.full_regen || effects.appended.is_empty() {
                Regen::All(true)
            } else {
                Regen::Append(std::mem::take(&mut effects.appended))
            });
            out.notifications.push(Notification::ContentChanged(count));
            debug!("committed change {count}");
        }
        if effects.redraw || effects.modified {
            st.dynamic = Self::build_dynamic(st);
            out.redraw = true;
            if gesture != Some(GestureState::Moved) {
                out.notifications.push(Notification::DynamicChanged);
            }
        }
        out
    }

    fn dispatch(&self, outcome: Outcome) {
        let host = self.host();
        if let Some(regen) = outcome.regen {
            match (&host, regen) {
                (Some(host), Regen::All(changed)) => host.regen_all(changed),
                (Some(host), Regen::Append(ids)) => ids.into_iter().for_each(|id| host.regen_append(id)),
                (Some(host), Regen::Restored) => host.history_restored(),
                (None, Regen::All(false)) => {}
                (None, Regen::Restored) => self.record_inline(false),
                (None, _) => self.record_inline(true),
            }
        }
        if outcome.redraw {
            if let Some(host) = &host {
                host.redraw();
            }
        }
        for notification in &outcome.notifications {
            self.notifier.emit(notification);
        }
    }

    /// Without a host there is no record worker; log commits directly.
    /// `undo` is false for states that came out of the undo log.
    fn record_inline(&self, undo: bool) {
        let doc = self.acquire_front_doc();
        let tick = self.record_tick();
        if undo {
            self.record_frame(RecordKind::Undo, &RecordFrame::new(0, Some(doc.clone()), None));
        }
        if let Some(tick) = tick {
            self.record_frame(RecordKind::Record, &RecordFrame::new(tick, Some(doc), None));
        }
    }

    fn call_command<R: Default>(
        &self,
        f: impl FnOnce(&mut (dyn Command + 'static), &mut CommandEnv<'_>) -> R,
    ) -> R {
        let (result, outcome) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let (result, effects) = self.run_command(st, f);
            (result, self.settle(st, effects, None))
        };
        self.dispatch(outcome);
        result
    }

    // Commands.

    pub fn get_command(&self) -> String {
        self.state.lock().commands.name().to_string()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.state.lock().commands.names().into_iter().map(str::to_string).collect()
    }

    pub fn set_command(&self, name: &str) -> bool {
        self.set_command_params(name, &Value::Null)
    }

    /// Activate a command with JSON parameters. Invalid JSON fails.
    pub fn set_command_with(&self, name: &str, params: &str) -> bool {
        match serde_json::from_str::<Value>(params) {
            Ok(params) => self.set_command_params(name, &params),
            Err(e) => {
                warn!("bad parameters for {name}: {e}");
                false
            }
        }
    }

    pub fn set_command_params(&self, name: &str, params: &Value) -> bool {
        if self.is_stopping() {
            return false;
        }
        let (ok, outcome) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut env = CommandEnv::new(&mut st.back, &st.context, &self.config);
            let ok = st.commands.set_command(&mut env, name, params);
            let effects = env.effects;
            if ok {
                st.handler = Handler::None;
            }
            (ok, self.settle(st, effects, None))
        };
        self.dispatch(outcome);
        ok
    }

    pub fn clear_command(&self) -> bool {
        let (ok, outcome) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut env = CommandEnv::new(&mut st.back, &st.context, &self.config);
            let ok = st.commands.clear(&mut env);
            let effects = env.effects;
            st.handler = Handler::None;
            (ok, self.settle(st, effects, None))
        };
        self.dispatch(outcome);
        ok
    }

    pub fn switch_command(&self) -> bool {
        let (ok, outcome) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut env = CommandEnv::new(&mut st.back, &st.context, &self.config);
            let ok = st.commands.switch_command(&mut env);
            let effects = env.effects;
            (ok, self.settle(st, effects, None))
        };
        self.dispatch(outcome);
        ok
    }

    // Selection.

    pub fn selected_ids(&self) -> Vec<ShapeId> {
        let st = self.state.lock();
        st.commands.current().map(|c| c.selected_ids()).unwrap_or_default()
    }

    /// The selected shape when exactly one is selected.
    pub fn selected_shape_id(&self) -> Option<ShapeId> {
        match self.selected_ids().as_slice() {
            [id] => Some(*id),
            _ => None,
        }
    }

    pub fn selected_handle(&self) -> Option<usize> {
        self.state.lock().commands.current().and_then(|c| c.selected_handle())
    }

    pub fn delete_selection(&self) -> usize {
        self.call_command(|cmd, env| cmd.delete_selection(env))
    }

    pub fn select_all(&self) -> usize {
        self.call_command(|cmd, env| cmd.select_all(env))
    }

    // Drawing context.

    /// Context of the selected shape, or the defaults for new shapes.
    pub fn context(&self) -> ShapeContext {
        let st = self.state.lock();
        st.commands
            .current()
            .and_then(|c| c.selected_ids().first().copied())
            .and_then(|id| st.back.shapes.get(id))
            .map(|s| s.context.clone())
            .unwrap_or_else(|| st.context.clone())
    }

    /// Apply the masked fields to the selection when there is one (one
    /// commit), otherwise to the defaults for new shapes.
    pub fn set_context(&self, ctx: &ShapeContext, mask: ContextMask) -> bool {
        let outcome = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let (applied, effects) = self.run_command(st, |cmd, env| cmd.set_context(env, ctx, mask));
            if !applied {
                st.context.merge(ctx, mask);
            }
            self.settle(st, effects, None)
        };
        self.dispatch(outcome);
        true
    }

    fn set_field(&self, mask: ContextMask, edit: impl FnOnce(&mut ShapeContext)) -> bool {
        let mut ctx = self.context();
        edit(&mut ctx);
        self.set_context(&ctx, mask)
    }

    pub fn line_width(&self) -> f64 {
        self.context().line_width
    }

    pub fn set_line_width(&self, width: f64) -> bool {
        self.set_field(ContextMask::LINE_WIDTH, |c| c.line_width = width)
    }

    pub fn line_style(&self) -> LineStyle {
        self.context().line_style
    }

    pub fn set_line_style(&self, style: LineStyle) -> bool {
        self.set_field(ContextMask::LINE_STYLE, |c| c.line_style = style)
    }

    pub fn line_color(&self) -> Argb {
        self.context().line_color
    }

    pub fn set_line_color(&self, argb: Argb) -> bool {
        self.set_field(ContextMask::LINE_ARGB, |c| c.line_color = argb)
    }

    pub fn line_alpha(&self) -> u8 {
        self.context().line_color.alpha()
    }

    pub fn set_line_alpha(&self, alpha: u8) -> bool {
        self.set_field(ContextMask::LINE_ALPHA, |c| c.line_color = c.line_color.with_alpha(alpha))
    }

    pub fn fill_color(&self) -> Argb {
        self.context().fill_color
    }

    pub fn set_fill_color(&self, argb: Argb) -> bool {
        self.set_field(ContextMask::FILL_ARGB, |c| c.fill_color = argb)
    }

    pub fn fill_alpha(&self) -> u8 {
        self.context().fill_color.alpha()
    }

    pub fn set_fill_alpha(&self, alpha: u8) -> bool {
        self.set_field(ContextMask::FILL_ALPHA, |c| c.fill_color = c.fill_color.with_alpha(alpha))
    }

    pub fn start_arrow(&self) -> ArrowHead {
        self.context().start_arrow
    }

    pub fn set_start_arrow(&self, head: ArrowHead) -> bool {
        self.set_field(ContextMask::START_ARROW, |c| c.start_arrow = head)
    }

    pub fn end_arrow(&self) -> ArrowHead {
        self.context().end_arrow
    }

    pub fn set_end_arrow(&self, head: ArrowHead) -> bool {
        self.set_field(ContextMask::END_ARROW, |c| c.end_arrow = head)
    }

    // Snapshots.

    /// The current front document. Holding it keeps that version alive.
    pub fn acquire_front_doc(&self) -> ShapeDocument {
        self.state.lock().front.clone()
    }

    pub fn acquire_dynamic_shapes(&self) -> DynamicShapeSet {
        self.state.lock().dynamic.clone()
    }

    /// A graphics slot mapped by the current camera.
    pub fn acquire_graphics(&self) -> Option<GraphicsContext> {
        let st = self.state.lock();
        self.pool.acquire(st.camera.transform(), st.viewport)
    }

    /// Document, overlay and graphics slot taken together. `None` once the
    /// view is stopping.
    pub fn acquire_snapshot(&self) -> Option<Snapshot> {
        if self.is_stopping() {
            return None;
        }
        let st = self.state.lock();
        Some(Snapshot {
            doc: st.front.clone(),
            dynamic: st.dynamic.clone(),
            camera: st.camera,
            viewport: st.viewport,
            graphics: self.pool.acquire(st.camera.transform(), st.viewport),
        })
    }

    pub fn graphics_pool(&self) -> &Arc<GraphicsPool> {
        &self.pool
    }

    pub fn shape_count(&self) -> usize {
        self.state.lock().front.shapes.len()
    }

    pub fn change_count(&self) -> u64 {
        self.state.lock().front.change_count()
    }

    // View transform.

    pub fn camera(&self) -> Camera {
        self.state.lock().camera
    }

    pub fn viewport(&self) -> Size {
        self.state.lock().viewport
    }

    pub fn set_viewport(&self, size: Size) {
        self.state.lock().viewport = size;
    }

    pub fn display_to_model(&self, point: Point) -> Point {
        self.state.lock().camera.display_to_model(point)
    }

    /// Fit the document into the viewport. False for an empty document.
    pub fn zoom_to_extent(&self) -> bool {
        let outcome = {
            let mut st = self.state.lock();
            let Some(extent) = st.front.shapes.extent() else {
                return false;
            };
            let viewport = st.viewport;
            st.camera.fit_to_bounds(extent, viewport, self.config.fit_padding);
            let mut out = Outcome::default();
            out.camera_moved();
            out.notifications.push(Notification::ZoomChanged(st.camera.zoom));
            out
        };
        self.dispatch(outcome);
        true
    }

    // Lifecycle.

    /// Refuse further work. Workers observe this and exit.
    pub fn stop_drawing(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("view {} stopping", self.id);
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    // Documents.

    /// Replace the document, keeping the change counter and the id counter
    /// increasing. `restored` marks a state read back from the undo log.
    fn publish(&self, mut data: DocumentData, restored: bool) {
        let outcome = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let (_, mut effects) = self.run_command(st, |cmd, env| cmd.cancel(env));
            // Whatever the command left in the back document is replaced.
            effects.modified = false;
            effects.appended.clear();
            let count = st.front.change_count() + 1;
            data.shapes.set_change_count(count);
            data.shapes.reserve_ids(st.front.shapes.next_id());
            st.back = ShapeDocument::from_data(data);
            st.front = st.back.clone();
            st.handler = Handler::None;
            effects.redraw = true;
            let mut out = self.settle(st, effects, None);
            out.regen = Some(if restored { Regen::Restored } else { Regen::All(true) });
            out.notifications.push(Notification::ContentChanged(count));
            out
        };
        self.dispatch(outcome);
    }

    pub fn save_to_file(&self, storage: &dyn Storage, key: &str) -> bool {
        let doc = self.acquire_front_doc();
        match vg::write_document(storage, key, &doc) {
            Ok(()) => {
                info!("saved {} shapes to {key}", doc.shapes.len());
                true
            }
            Err(e) => {
                warn!("save to {key} failed: {e}");
                false
            }
        }
    }

    /// Load a document. On failure the current document is untouched.
    pub fn load_from_file(&self, storage: &dyn Storage, key: &str) -> bool {
        let loaded = vg::read_document(storage, key, &self.registry.read());
        match loaded {
            Ok(data) => {
                info!("loaded {} shapes from {key}", data.shapes.len());
                self.publish(data, false);
                true
            }
            Err(e) => {
                warn!("load from {key} failed: {e}");
                false
            }
        }
    }

    fn path_storage(path: &Path) -> StorageResult<(FileStorage, String)> {
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::Io(format!("no file name in {}", path.display())))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        Ok((FileStorage::new(dir)?, key.to_string()))
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> bool {
        match Self::path_storage(path.as_ref()) {
            Ok((storage, key)) => self.save_to_file(&storage, &key),
            Err(e) => {
                warn!("save failed: {e}");
                false
            }
        }
    }

    pub fn load_from_path(&self, path: impl AsRef<Path>) -> bool {
        match Self::path_storage(path.as_ref()) {
            Ok((storage, key)) => self.load_from_file(&storage, &key),
            Err(e) => {
                warn!("load failed: {e}");
                false
            }
        }
    }

    pub fn export_json(&self) -> Option<String> {
        let doc = self.acquire_front_doc();
        serde_json::to_string_pretty(&vg::document_to_json(&doc))
            .map_err(|e| warn!("export failed: {e}"))
            .ok()
    }

    pub fn import_json(&self, text: &str) -> bool {
        let parsed = serde_json::from_str::<Value>(text)
            .map_err(StorageError::from)
            .and_then(|value| vg::document_from_json(&value, &self.registry.read()));
        match parsed {
            Ok(data) => {
                self.publish(data, false);
                true
            }
            Err(e) => {
                warn!("import failed: {e}");
                false
            }
        }
    }

    // History and recording.

    /// Start keeping undo snapshots in `storage`, beginning with the current
    /// document.
    pub fn start_undo_log(&self, storage: Arc<dyn Storage>) -> bool {
        let doc = self.acquire_front_doc();
        let mut log = FrameLog::new(RecordKind::Undo, storage);
        if let Err(e) = log.record(&RecordFrame::new(0, Some(doc), None)) {
            warn!("undo log unavailable: {e}");
            return false;
        }
        *self.undo_log.lock() = Some(log);
        true
    }

    /// Start a session recording. Fails while already recording.
    pub fn start_record_log(&self, storage: Arc<dyn Storage>) -> bool {
        let mut recording = self.recording.lock();
        if recording.is_some() {
            warn!("already recording");
            return false;
        }
        let doc = self.acquire_front_doc();
        let mut log = FrameLog::new(RecordKind::Record, storage);
        if let Err(e) = log.record(&RecordFrame::new(0, Some(doc), None)) {
            warn!("recording unavailable: {e}");
            return false;
        }
        *recording = Some(Recording {
            log,
            clock: RecordClock::new(),
        });
        true
    }

    pub fn stop_record_log(&self) -> bool {
        self.recording.lock().take().is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().is_some()
    }

    pub fn pause_record(&self) -> bool {
        self.recording.lock().as_mut().is_some_and(|r| r.clock.pause())
    }

    pub fn resume_record(&self) -> bool {
        self.recording.lock().as_mut().is_some_and(|r| r.clock.resume())
    }

    /// Tick for the next recorded frame; `None` when not recording or paused.
    pub fn record_tick(&self) -> Option<u32> {
        self.recording
            .lock()
            .as_ref()
            .filter(|r| !r.clock.is_paused())
            .map(|r| r.clock.tick())
    }

    pub fn can_undo(&self) -> bool {
        self.undo_log.lock().as_ref().is_some_and(FrameLog::can_undo)
    }

    pub fn can_redo(&self) -> bool {
        self.undo_log.lock().as_ref().is_some_and(FrameLog::can_redo)
    }

    /// Step back. Goes through the host's record worker when there is one.
    pub fn undo(&self) -> bool {
        match self.host() {
            Some(host) => host.request_undo() || RecordTarget::undo(self),
            None => RecordTarget::undo(self),
        }
    }

    pub fn redo(&self) -> bool {
        match self.host() {
            Some(host) => host.request_redo() || RecordTarget::redo(self),
            None => RecordTarget::redo(self),
        }
    }

    fn step_history(&self, back: bool) -> bool {
        if self.is_stopping() {
            return false;
        }
        let restored = {
            let mut guard = self.undo_log.lock();
            let Some(log) = guard.as_mut() else {
                return false;
            };
            let registry = self.registry.read();
            let step = if back { log.undo(&registry) } else { log.redo(&registry) };
            match step {
                Ok(Some(data)) => data,
                Ok(None) => return false,
                Err(e) => {
                    warn!("history step failed: {e}");
                    return false;
                }
            }
        };
        self.publish(restored, true);
        true
    }
}

impl RecordTarget for CoreView {
    fn record_frame(&self, kind: RecordKind, frame: &RecordFrame) -> Option<RecordedFrame> {
        if self.is_stopping() {
            return None;
        }
        let result = match kind {
            RecordKind::Undo => self.undo_log.lock().as_mut().map(|log| log.record(frame)),
            RecordKind::Record => self.recording.lock().as_mut().map(|r| r.log.record(frame)),
        };
        match result {
            Some(Ok(recorded)) => recorded,
            Some(Err(e)) => {
                warn!("{kind} frame {} not written: {e}", frame.tick);
                None
            }
            None => None,
        }
    }

    fn undo(&self) -> bool {
        self.step_history(true)
    }

    fn redo(&self) -> bool {
        self.step_history(false)
    }
}

impl CoreView {
    fn track_motion(&self, st: &mut ViewState, kind: GestureKind, state: GestureState, point: Point, switch: bool) {
        let point_m = st.camera.display_to_model(point);
        let m = &mut st.motion;
        if state == GestureState::Possible || (kind == GestureKind::Press && state == GestureState::Began) {
            m.start_pt = point;
            m.start_pt_m = point_m;
            m.last_pt_m = point_m;
        }
        m.kind = kind;
        m.state = state;
        m.point = point;
        m.point_m = point_m;
        m.finger_count = 1;
        m.switch_gesture = switch;
        m.pressed = kind == GestureKind::Press;
        m.zoom = st.camera.zoom;
        m.tolerance = self.config.hit_tolerance;
    }

    fn tap_gesture(&self, st: &mut ViewState, kind: GestureKind, m: &Motion) -> (bool, Effects) {
        match m.state {
            GestureState::Possible => (true, Effects::default()),
            GestureState::Ended if kind == GestureKind::Tap => {
                self.run_command(st, |cmd, env| cmd.click(env, m))
            }
            GestureState::Ended => self.run_command(st, |cmd, env| cmd.double_click(env, m)),
            _ => (false, Effects::default()),
        }
    }

    fn pan_view(st: &mut ViewState, point: Point) {
        let delta = point - st.pan_last;
        st.camera.pan(delta);
        st.pan_last = point;
    }

    fn pan_gesture(&self, st: &mut ViewState, m: &Motion) -> (bool, Effects) {
        let none = || (false, Effects::default());
        match m.state {
            GestureState::Possible => {
                let accepts = {
                    let ViewState {
                        back,
                        context,
                        commands,
                        ..
                    } = &mut *st;
                    let env = CommandEnv::new(back, context, &self.config);
                    commands.current().is_some_and(|c| c.accepts(&env, m))
                };
                st.handler = if accepts { Handler::Command } else { Handler::View };
                st.pan_last = m.point;
                (true, Effects::default())
            }
            GestureState::Began => {
                st.pan_last = m.point;
                if st.handler != Handler::Command {
                    return (st.handler == Handler::View, Effects::default());
                }
                let (began, effects) = self.run_command(st, |cmd, env| cmd.touch_began(env, m));
                if !began {
                    debug!("command declined the drag, panning");
                    st.handler = Handler::View;
                }
                (true, effects)
            }
            GestureState::Moved => match st.handler {
                Handler::Command => self.run_command(st, |cmd, env| cmd.touch_moved(env, m)),
                Handler::View => {
                    Self::pan_view(st, m.point);
                    (true, Effects::default())
                }
                Handler::None => none(),
            },
            GestureState::Ended => match std::mem::take(&mut st.handler) {
                Handler::Command => {
                    let (_, mut effects) = self.run_command(st, |cmd, env| cmd.touch_moved(env, m));
                    let (ended, more) = self.run_command(st, |cmd, env| cmd.touch_ended(env, m));
                    effects.absorb(more);
                    (ended, effects)
                }
                Handler::View => {
                    Self::pan_view(st, m.point);
                    (true, Effects::default())
                }
                Handler::None => none(),
            },
            GestureState::Cancel => match std::mem::take(&mut st.handler) {
                Handler::Command => self.run_command(st, |cmd, env| cmd.cancel(env)),
                Handler::View => (true, Effects::default()),
                Handler::None => none(),
            },
        }
    }

    fn press_gesture(&self, st: &mut ViewState, m: &Motion) -> (bool, Effects) {
        match m.state {
            GestureState::Possible => (true, Effects::default()),
            GestureState::Began => {
                let (pressed, mut effects) = self.run_command(st, |cmd, env| cmd.long_press(env, m));
                let (began, more) = self.run_command(st, |cmd, env| cmd.touch_began(env, m));
                effects.absorb(more);
                st.handler = if began { Handler::Command } else { Handler::None };
                (pressed || began, effects)
            }
            GestureState::Moved if st.handler == Handler::Command => {
                self.run_command(st, |cmd, env| cmd.touch_moved(env, m))
            }
            GestureState::Ended if st.handler == Handler::Command => {
                st.handler = Handler::None;
                self.run_command(st, |cmd, env| cmd.touch_ended(env, m))
            }
            GestureState::Cancel if st.handler == Handler::Command => {
                st.handler = Handler::None;
                self.run_command(st, |cmd, env| cmd.cancel(env))
            }
            _ => (false, Effects::default()),
        }
    }
}

impl GestureSink for CoreView {
    fn on_gesture(&self, kind: GestureKind, state: GestureState, point: Point, switch_gesture: bool) -> bool {
        if self.is_stopping() {
            return false;
        }
        let (handled, outcome) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            self.track_motion(st, kind, state, point, switch_gesture);
            let motion = st.motion;
            let camera = st.camera;
            let (handled, effects) = match kind {
                GestureKind::Tap | GestureKind::DblTap => self.tap_gesture(st, kind, &motion),
                GestureKind::Pan => self.pan_gesture(st, &motion),
                GestureKind::Press => self.press_gesture(st, &motion),
                GestureKind::TwoFinger => (false, Effects::default()),
            };
            st.motion.last_pt_m = motion.point_m;
            let mut outcome = self.settle(st, effects, Some(state));
            if st.camera != camera {
                outcome.camera_moved();
            }
            (handled, outcome)
        };
        self.dispatch(outcome);
        handled
    }

    fn two_fingers_move(&self, state: GestureState, p1: Point, p2: Point, _switch_gesture: bool) -> bool {
        if self.is_stopping() {
            return false;
        }
        let outcome = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut out = Outcome::default();
            match state {
                GestureState::Possible => {}
                GestureState::Began => st.pinch = Some(st.camera.begin_pinch(p1, p2)),
                GestureState::Moved => {
                    if let Some(pinch) = st.pinch {
                        st.camera.apply_pinch(&pinch, p1, p2);
                        out.camera_moved();
                    }
                }
                GestureState::Ended | GestureState::Cancel => {
                    if let Some(pinch) = st.pinch.take() {
                        if state == GestureState::Ended {
                            st.camera.apply_pinch(&pinch, p1, p2);
                        }
                        out.camera_moved();
                        out.notifications.push(Notification::ZoomChanged(st.camera.zoom));
                    }
                }
            }
            out
        };
        self.dispatch(outcome);
        true
    }

    fn gestures_disabled(&self) {
        self.clear_command();
    }
}
