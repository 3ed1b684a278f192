//! Command state machine.
//!
//! Exactly one [`Command`] is active per view. The [`CommandManager`]
//! switches commands by name and routes gesture callbacks to the active one.
//! Commands draw only into their own dynamic overlay while a gesture runs and
//! touch the document through [`CommandEnv`], which records what the kernel
//! must do afterwards (commit, repaint, notify) in [`Effects`].

mod draw;
mod erase;
mod select;

pub use draw::{DrawCommand, DrawKind, DrawParams, LinesCommand};
pub use erase::EraseCommand;
pub use select::SelectCommand;

use crate::config::KernelConfig;
use crate::container::Shapes;
use crate::document::ShapeDocument;
use crate::dynamic::DynamicData;
use crate::gesture::{GestureKind, GestureState};
use crate::notify::Notification;
use crate::shapes::{ContextMask, Shape, ShapeContext, ShapeId};
use kurbo::Point;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Alias for the most recently used drawing command.
pub const DRAW_ALIAS: &str = "@draw";
/// Alias for the current command.
pub const LAST_ALIAS: &str = "@last";

/// One gesture sample in both coordinate spaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub kind: GestureKind,
    pub state: GestureState,
    /// Display coordinates.
    pub point: Point,
    /// Model coordinates.
    pub point_m: Point,
    pub start_pt: Point,
    pub start_pt_m: Point,
    /// Model point of the previous sample in this gesture.
    pub last_pt_m: Point,
    pub finger_count: usize,
    /// Set when the gesture replaces one with a different finger count.
    pub switch_gesture: bool,
    /// Whether this drag began with a long press.
    pub pressed: bool,
    /// Display pixels per model unit.
    pub zoom: f64,
    /// Hit tolerance in display pixels.
    pub tolerance: f64,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            kind: GestureKind::Pan,
            state: GestureState::Possible,
            point: Point::ZERO,
            point_m: Point::ZERO,
            start_pt: Point::ZERO,
            start_pt_m: Point::ZERO,
            last_pt_m: Point::ZERO,
            finger_count: 1,
            switch_gesture: false,
            pressed: false,
            zoom: 1.0,
            tolerance: 10.0,
        }
    }
}

impl Motion {
    /// Hit tolerance converted to model units.
    pub fn tolerance_m(&self) -> f64 {
        self.tolerance / self.zoom
    }

    /// Display distance travelled since the gesture began.
    pub fn drag_distance(&self) -> f64 {
        self.point.distance(self.start_pt)
    }
}

/// What the kernel must do after a command call.
#[derive(Debug, Default)]
pub struct Effects {
    /// The back document was edited; commit it as one change.
    pub modified: bool,
    /// Edits were limited to appending these shapes.
    pub appended: Vec<ShapeId>,
    /// An edit other than an append happened.
    pub full_regen: bool,
    /// The dynamic overlay changed.
    pub redraw: bool,
    pub notifications: Vec<Notification>,
    /// Switch to another command once this call returns.
    pub switch_to: Option<(String, Value)>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        !self.modified && !self.redraw && self.notifications.is_empty() && self.switch_to.is_none()
    }

    /// Fold in the effects of a follow-up call.
    pub fn absorb(&mut self, other: Effects) {
        self.modified |= other.modified;
        self.appended.extend(other.appended);
        self.full_regen |= other.full_regen;
        self.redraw |= other.redraw;
        self.notifications.extend(other.notifications);
        if other.switch_to.is_some() {
            self.switch_to = other.switch_to;
        }
    }
}

/// Document access for a command call.
pub struct CommandEnv<'a> {
    doc: &'a mut ShapeDocument,
    /// Drawing defaults for new shapes.
    pub context: &'a ShapeContext,
    pub config: &'a KernelConfig,
    pub effects: Effects,
}

impl<'a> CommandEnv<'a> {
    pub fn new(doc: &'a mut ShapeDocument, context: &'a ShapeContext, config: &'a KernelConfig) -> Self {
        Self {
            doc,
            context,
            config,
            effects: Effects::default(),
        }
    }

    pub fn shapes(&self) -> &Shapes {
        &self.doc.shapes
    }

    pub fn is_read_only(&self) -> bool {
        self.doc.read_only
    }

    fn shapes_mut(&mut self) -> Option<&mut Shapes> {
        if self.doc.read_only {
            warn!("edit refused: document is read-only");
            return None;
        }
        self.effects.modified = true;
        Some(&mut self.doc.make_mut().shapes)
    }

    /// Edit the back document in place. Returns `None` for read-only documents.
    pub fn edit(&mut self) -> Option<&mut Shapes> {
        self.effects.full_regen = true;
        self.shapes_mut()
    }

    /// Append a shape on top. Returns its id.
    pub fn add_shape(&mut self, shape: Shape) -> Option<ShapeId> {
        let id = self.shapes_mut()?.add(shape);
        self.effects.appended.push(id);
        Some(id)
    }

    /// Delete shapes, notifying each removal. Returns the ids removed.
    pub fn delete_shapes(&mut self, ids: &[ShapeId]) -> Vec<ShapeId> {
        if ids.is_empty() || !ids.iter().any(|id| self.shapes().contains(*id)) {
            return Vec::new();
        }
        let Some(shapes) = self.edit() else {
            return Vec::new();
        };
        let removed = shapes.remove_all(ids);
        for id in &removed {
            self.effects.notifications.push(Notification::ShapeDeleted(*id));
        }
        removed
    }

    pub fn redraw(&mut self) {
        self.effects.redraw = true;
    }

    pub fn notify(&mut self, notification: Notification) {
        self.effects.notifications.push(notification);
    }

    pub fn switch_to(&mut self, name: &str, params: Value) {
        self.effects.switch_to = Some((name.to_string(), params));
    }
}

/// A named, stateful strategy bound to one gesture lifecycle at a time.
///
/// Handlers return whether they used the gesture. Returning false from
/// [`Command::touch_began`] hands the drag to the view (panning).
pub trait Command: Send {
    fn name(&self) -> &str;

    /// Configure from JSON parameters. Returning false aborts the switch.
    fn initialize(&mut self, _env: &mut CommandEnv<'_>, _params: &Value) -> bool {
        true
    }

    /// Drop any in-progress work without committing it.
    fn cancel(&mut self, env: &mut CommandEnv<'_>) -> bool;

    /// Whether another command may replace this one now.
    fn can_yield(&self) -> bool {
        true
    }

    /// Drawing commands are remembered as the `@draw` target.
    fn is_drawing(&self) -> bool {
        false
    }

    /// Whether a gesture should go to this command rather than the view.
    fn accepts(&self, _env: &CommandEnv<'_>, _motion: &Motion) -> bool {
        true
    }

    fn click(&mut self, _env: &mut CommandEnv<'_>, _motion: &Motion) -> bool {
        false
    }

    fn double_click(&mut self, _env: &mut CommandEnv<'_>, _motion: &Motion) -> bool {
        false
    }

    fn long_press(&mut self, _env: &mut CommandEnv<'_>, _motion: &Motion) -> bool {
        false
    }

    fn touch_began(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool;

    fn touch_moved(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool;

    fn touch_ended(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool;

    /// Current overlay contents.
    fn dynamic(&self, _shapes: &Shapes) -> DynamicData {
        DynamicData::default()
    }

    fn selected_ids(&self) -> Vec<ShapeId> {
        Vec::new()
    }

    fn selected_handle(&self) -> Option<usize> {
        None
    }

    /// Apply context fields to the selection. False if nothing is selected.
    fn set_context(&mut self, _env: &mut CommandEnv<'_>, _ctx: &ShapeContext, _mask: ContextMask) -> bool {
        false
    }

    /// Delete the selection. Returns the number of shapes removed.
    fn delete_selection(&mut self, _env: &mut CommandEnv<'_>) -> usize {
        0
    }

    fn select_all(&mut self, _env: &mut CommandEnv<'_>) -> usize {
        0
    }
}

/// Creates a fresh command instance.
pub type CommandFactory = Arc<dyn Fn() -> Box<dyn Command> + Send + Sync>;

struct Registration {
    factory: CommandFactory,
    drawing: bool,
}

/// Owns the active command and the registered factories.
pub struct CommandManager {
    factories: BTreeMap<String, Registration>,
    current: Option<Box<dyn Command>>,
    last_draw: String,
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandManager")
            .field("commands", &self.factories.keys().collect::<Vec<_>>())
            .field("current", &self.name())
            .field("last_draw", &self.last_draw)
            .finish()
    }
}

impl CommandManager {
    pub fn new(default_draw: &str) -> Self {
        Self {
            factories: BTreeMap::new(),
            current: None,
            last_draw: default_draw.to_string(),
        }
    }

    /// A manager with `select`, `erase` and the drawing commands.
    pub fn with_builtins(default_draw: &str) -> Self {
        let mut manager = Self::new(default_draw);
        manager.register(SelectCommand::NAME, false, || Box::new(SelectCommand::new()));
        manager.register(EraseCommand::NAME, false, || Box::new(EraseCommand::new()));
        for kind in [DrawKind::Line, DrawKind::Rect, DrawKind::Ellipse, DrawKind::Splines] {
            manager.register(kind.command_name(), true, move || Box::new(DrawCommand::new(kind)));
        }
        manager.register(LinesCommand::NAME, true, || Box::new(LinesCommand::new()));
        manager
    }

    pub fn register<F>(&mut self, name: &str, drawing: bool, factory: F)
    where
        F: Fn() -> Box<dyn Command> + Send + Sync + 'static,
    {
        self.factories.insert(
            name.to_string(),
            Registration {
                factory: Arc::new(factory),
                drawing,
            },
        );
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Name of the active command, empty when none.
    pub fn name(&self) -> &str {
        self.current.as_deref().map(Command::name).unwrap_or("")
    }

    pub fn last_draw(&self) -> &str {
        &self.last_draw
    }

    pub fn current(&self) -> Option<&dyn Command> {
        self.current.as_deref()
    }

    pub fn current_mut(&mut self) -> Option<&mut (dyn Command + 'static)> {
        self.current.as_deref_mut()
    }

    fn resolve<'n>(&'n self, name: &'n str) -> &'n str {
        match name {
            DRAW_ALIAS => &self.last_draw,
            LAST_ALIAS if self.current.is_some() => self.name(),
            LAST_ALIAS => &self.last_draw,
            _ => name,
        }
    }

    /// Activate a command by name.
    ///
    /// Fails for unknown names and while the active command refuses to
    /// yield. `erase` with a non-empty selection deletes the selection
    /// instead and reports failure. A failed initialization keeps the
    /// previous command active.
    pub fn set_command(&mut self, env: &mut CommandEnv<'_>, name: &str, params: &Value) -> bool {
        let name = self.resolve(name).to_string();

        if name == EraseCommand::NAME {
            if let Some(cmd) = self.current.as_deref_mut() {
                if !cmd.selected_ids().is_empty() {
                    let removed = cmd.delete_selection(env);
                    debug!("erase with selection removed {removed} shapes");
                    env.redraw();
                    return false;
                }
            }
        }

        let Some(registration) = self.factories.get(&name) else {
            warn!("unknown command {name:?}");
            return false;
        };
        if let Some(cmd) = self.current.as_deref() {
            if !cmd.can_yield() {
                debug!("command {} refuses to yield to {name}", cmd.name());
                return false;
            }
        }

        let drawing = registration.drawing;
        let mut next = (registration.factory)();
        let mut previous = self.current.take();
        if let Some(cmd) = previous.as_deref_mut() {
            cmd.cancel(env);
        }
        if !next.initialize(env, params) {
            warn!("command {name} failed to initialize");
            self.current = previous;
            env.redraw();
            return false;
        }

        info!("command {} -> {name}", previous.as_deref().map(Command::name).unwrap_or(""));
        if drawing {
            self.last_draw = name.clone();
        }
        self.current = Some(next);
        env.redraw();
        env.notify(Notification::CommandChanged(name));
        true
    }

    /// Cancel and drop the active command.
    pub fn clear(&mut self, env: &mut CommandEnv<'_>) -> bool {
        let Some(mut cmd) = self.current.take() else {
            return false;
        };
        cmd.cancel(env);
        env.redraw();
        env.notify(Notification::CommandChanged(String::new()));
        true
    }

    /// Move to the next registered drawing command after the active one.
    pub fn switch_command(&mut self, env: &mut CommandEnv<'_>) -> bool {
        let drawing: Vec<String> = self
            .factories
            .iter()
            .filter(|(_, r)| r.drawing)
            .map(|(name, _)| name.clone())
            .collect();
        if drawing.is_empty() {
            return false;
        }
        let current = self.name();
        let next = match drawing.iter().position(|n| n == current) {
            Some(i) => drawing[(i + 1) % drawing.len()].clone(),
            None => drawing[0].clone(),
        };
        self.set_command(env, &next, &Value::Null)
    }
}
