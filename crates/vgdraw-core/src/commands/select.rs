//! Selection, move and vertex editing.

use super::{Command, CommandEnv, Motion};
use crate::container::Shapes;
use crate::dynamic::DynamicData;
use crate::notify::Notification;
use crate::shapes::{ContextMask, Shape, ShapeContext, ShapeId};
use kurbo::{Affine, Point, Rect, Vec2};
use log::debug;
use serde_json::Value;

/// State of a drag interaction.
#[derive(Debug, Clone, Default)]
enum Drag {
    #[default]
    Idle,
    /// Moving the selection by `offset`.
    Move { offset: Vec2 },
    /// Dragging one control point of a shape.
    Handle { id: ShapeId, index: usize, point: Point },
    /// Rubber-band selection.
    Marquee { start: Point, current: Point },
}

/// Picks shapes and edits them in place.
#[derive(Debug, Default)]
pub struct SelectCommand {
    selection: Vec<ShapeId>,
    handle: Option<usize>,
    drag: Drag,
}

impl SelectCommand {
    pub const NAME: &'static str = "select";

    pub fn new() -> Self {
        Self::default()
    }

    fn set_selection(&mut self, env: &mut CommandEnv<'_>, ids: Vec<ShapeId>) {
        self.handle = None;
        if ids != self.selection {
            self.selection = ids;
            env.notify(Notification::SelectionChanged(self.selection.clone()));
        }
        env.redraw();
    }

    /// The single selected shape, if exactly one is selected and still present.
    fn single<'s>(&self, shapes: &'s Shapes) -> Option<&'s Shape> {
        match self.selection.as_slice() {
            [id] => shapes.get(*id),
            _ => None,
        }
    }

    /// Pick the topmost shape under the point. Returns whether one was hit.
    fn pick(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        match env.shapes().hit_test(motion.point_m, motion.tolerance_m()) {
            Some(id) => {
                let tag = env.shapes().get(id).map(|s| s.tag).unwrap_or_default();
                self.set_selection(env, vec![id]);
                env.notify(Notification::ShapeClicked { id, tag });
                true
            }
            None => {
                self.set_selection(env, Vec::new());
                false
            }
        }
    }

    fn preview(&self, shapes: &Shapes) -> Vec<Shape> {
        match &self.drag {
            Drag::Move { offset } => self
                .selection
                .iter()
                .filter_map(|id| shapes.get(*id))
                .map(|s| {
                    let mut s = s.clone();
                    s.transform(Affine::translate(*offset));
                    s
                })
                .collect(),
            Drag::Handle { id, index, point } => shapes
                .get(*id)
                .map(|s| {
                    let mut s = s.clone();
                    s.set_point(*index, *point);
                    vec![s]
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn update_drag(&mut self, motion: &Motion) {
        match &mut self.drag {
            Drag::Move { offset } => *offset = motion.point_m - motion.start_pt_m,
            Drag::Handle { point, .. } => *point = motion.point_m,
            Drag::Marquee { current, .. } => *current = motion.point_m,
            Drag::Idle => {}
        }
    }
}

impl Command for SelectCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// Accepts `{"id": n}` to preselect a shape.
    fn initialize(&mut self, env: &mut CommandEnv<'_>, params: &Value) -> bool {
        if let Some(id) = params.get("id").and_then(Value::as_u64) {
            let id = id as ShapeId;
            if env.shapes().contains(id) {
                self.set_selection(env, vec![id]);
            }
        }
        true
    }

    fn cancel(&mut self, env: &mut CommandEnv<'_>) -> bool {
        let was_dragging = !matches!(self.drag, Drag::Idle);
        self.drag = Drag::Idle;
        env.redraw();
        was_dragging
    }

    fn can_yield(&self) -> bool {
        !matches!(self.drag, Drag::Move { .. } | Drag::Handle { .. })
    }

    fn click(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        self.pick(env, motion);
        true
    }

    fn long_press(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        self.pick(env, motion)
    }

    fn touch_began(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        let start = motion.start_pt_m;
        let handle_tol = env.config.handle_tolerance / motion.zoom;

        if let Some(shape) = self.single(env.shapes()) {
            if !shape.is_locked() {
                if let Some(index) = shape.handle_at(start, handle_tol) {
                    debug!("drag handle {index} of shape {}", shape.id());
                    self.handle = Some(index);
                    self.drag = Drag::Handle {
                        id: shape.id(),
                        index,
                        point: start,
                    };
                    env.redraw();
                    return true;
                }
            }
        }

        match env.shapes().hit_test(start, motion.tolerance_m()) {
            Some(id) => {
                if !self.selection.contains(&id) {
                    self.set_selection(env, vec![id]);
                }
                self.drag = Drag::Move { offset: Vec2::ZERO };
            }
            None => {
                self.set_selection(env, Vec::new());
                self.drag = Drag::Marquee {
                    start,
                    current: start,
                };
            }
        }
        env.redraw();
        true
    }

    fn touch_moved(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if matches!(self.drag, Drag::Idle) {
            return false;
        }
        self.update_drag(motion);
        env.redraw();
        true
    }

    fn touch_ended(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        self.update_drag(motion);
        match std::mem::take(&mut self.drag) {
            Drag::Idle => return false,
            Drag::Move { offset } => {
                if offset.hypot() > f64::EPSILON {
                    let ids = self.selection.clone();
                    if let Some(shapes) = env.edit() {
                        for id in ids {
                            if let Some(shape) = shapes.find_mut(id) {
                                shape.transform(Affine::translate(offset));
                            }
                        }
                    }
                }
            }
            Drag::Handle { id, index, point } => {
                if (point - motion.start_pt_m).hypot() > f64::EPSILON {
                    if let Some(shapes) = env.edit() {
                        if let Some(shape) = shapes.find_mut(id) {
                            shape.set_point(index, point);
                        }
                    }
                }
                self.handle = None;
            }
            Drag::Marquee { start, current } => {
                let ids = env.shapes().shapes_in_rect(Rect::from_points(start, current));
                self.set_selection(env, ids);
            }
        }
        env.redraw();
        true
    }

    fn dynamic(&self, shapes: &Shapes) -> DynamicData {
        let mut data = DynamicData {
            shapes: self.preview(shapes),
            ..DynamicData::default()
        };
        match &self.drag {
            Drag::Marquee { start, current } => {
                data.marquee = Some(Rect::from_points(*start, *current));
            }
            Drag::Handle { index, .. } => {
                data.handles = data.shapes.iter().flat_map(Shape::points).collect();
                data.active_handle = Some(*index);
            }
            _ => {
                if let Some(shape) = self.single(shapes) {
                    data.handles = shape.points();
                    data.active_handle = self.handle;
                }
            }
        }
        data
    }

    fn selected_ids(&self) -> Vec<ShapeId> {
        self.selection.clone()
    }

    fn selected_handle(&self) -> Option<usize> {
        self.handle
    }

    fn set_context(&mut self, env: &mut CommandEnv<'_>, ctx: &ShapeContext, mask: ContextMask) -> bool {
        if self.selection.is_empty() {
            return false;
        }
        let ids = self.selection.clone();
        let Some(shapes) = env.edit() else {
            return false;
        };
        for id in ids {
            if let Some(shape) = shapes.find_mut(id) {
                shape.context.merge(ctx, mask);
            }
        }
        true
    }

    fn delete_selection(&mut self, env: &mut CommandEnv<'_>) -> usize {
        let ids = std::mem::take(&mut self.selection);
        let removed = env.delete_shapes(&ids);
        self.handle = None;
        self.drag = Drag::Idle;
        env.notify(Notification::SelectionChanged(Vec::new()));
        removed.len()
    }

    fn select_all(&mut self, env: &mut CommandEnv<'_>) -> usize {
        let ids: Vec<ShapeId> = env
            .shapes()
            .iter()
            .filter(|s| !s.is_locked() && !s.is_hidden())
            .map(Shape::id)
            .collect();
        let count = ids.len();
        self.set_selection(env, ids);
        count
    }
}
