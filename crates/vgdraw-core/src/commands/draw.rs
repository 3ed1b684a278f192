//! Drawing commands.

use super::{Command, CommandEnv, Motion, SelectCommand};
use crate::container::Shapes;
use crate::dynamic::DynamicData;
use crate::shapes::{
    Argb, ArrowHead, ContextMask, EllipseShape, LineShape, LineStyle, LinesShape, RectShape,
    Shape, ShapeContext, ShapeFlags, ShapeKind, SplinesShape, coords_to_points,
};
use kurbo::Point;
use log::{debug, warn};
use serde_json::{Value, json};

/// Drawing parameters accepted by every drawing command.
///
/// Context fields are overrides merged onto the view's current context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawParams {
    pub context: ShapeContext,
    pub mask: ContextMask,
    pub flags: ShapeFlags,
    pub tag: i32,
    /// Model points for a shape created without a gesture.
    pub points: Vec<Point>,
    pub closed: bool,
}

impl DrawParams {
    pub fn parse(params: &Value) -> Self {
        let mut out = Self::default();
        let Some(map) = params.as_object() else {
            return out;
        };
        let int = |key: &str| map.get(key).and_then(Value::as_i64);

        if let Some(width) = map.get("lineWidth").and_then(Value::as_f64) {
            out.context.line_width = width;
            out.mask |= ContextMask::LINE_WIDTH;
        }
        if let Some(style) = int("lineStyle").and_then(LineStyle::from_code) {
            out.context.line_style = style;
            out.mask |= ContextMask::LINE_STYLE;
        }
        if let Some(argb) = int("lineARGB") {
            out.context.line_color = Argb(argb as u32);
            out.mask |= ContextMask::LINE_ARGB;
        }
        if let Some(rgb) = int("lineRGB") {
            out.context.line_color = out.context.line_color.with_rgb(rgb as u32);
            out.mask |= ContextMask::LINE_RGB;
        }
        if let Some(alpha) = int("lineAlpha") {
            out.context.line_color = out.context.line_color.with_alpha(alpha.clamp(0, 255) as u8);
            out.mask |= ContextMask::LINE_ALPHA;
        }
        if let Some(argb) = int("fillARGB") {
            out.context.fill_color = Argb(argb as u32);
            out.mask |= ContextMask::FILL_ARGB;
        }
        if let Some(alpha) = int("fillAlpha") {
            out.context.fill_color = out.context.fill_color.with_alpha(alpha.clamp(0, 255) as u8);
            out.mask |= ContextMask::FILL_ALPHA;
        }
        if let Some(head) = int("startArrowHead") {
            out.context.start_arrow = ArrowHead(head.clamp(0, 255) as u8);
            out.mask |= ContextMask::START_ARROW;
        }
        if let Some(head) = int("endArrowHead") {
            out.context.end_arrow = ArrowHead(head.clamp(0, 255) as u8);
            out.mask |= ContextMask::END_ARROW;
        }
        let flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);
        out.flags.set(ShapeFlags::LOCKED, flag("locked"));
        out.flags.set(ShapeFlags::HIDDEN, flag("hidden"));
        out.closed = flag("closed");
        out.tag = int("tag").unwrap_or(0) as i32;
        if let Some(coords) = map.get("points").and_then(Value::as_array) {
            let coords: Vec<f64> = coords.iter().filter_map(Value::as_f64).collect();
            out.points = coords_to_points(&coords);
        }
        out
    }

    /// Context for a new shape: `base` with the overrides applied.
    pub fn shape_context(&self, base: &ShapeContext) -> ShapeContext {
        let mut ctx = base.clone();
        ctx.merge(&self.context, self.mask);
        ctx
    }

    fn finish(&self, kind: Box<dyn ShapeKind>, base: &ShapeContext) -> Shape {
        let mut shape = Shape::from_box(kind).with_context(self.shape_context(base));
        shape.flags = self.flags;
        shape.tag = self.tag;
        shape
    }
}

/// Whether a shape is big enough on screen to keep.
fn large_enough(shape: &Shape, zoom: f64, min_size: f64) -> bool {
    let bounds = shape.bounds();
    bounds.width().max(bounds.height()) * zoom >= min_size
}

/// Leaving a drawing command by clicking an existing shape.
fn select_clicked(env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
    match env.shapes().hit_test(motion.point_m, motion.tolerance_m()) {
        Some(id) => {
            debug!("clicked shape {id}, switching to select");
            env.switch_to(SelectCommand::NAME, json!({ "id": id }));
            true
        }
        None => false,
    }
}

/// Shape kinds drawn with a single drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawKind {
    Line,
    Rect,
    Ellipse,
    /// Freehand curve through the sampled drag points.
    Splines,
}

impl DrawKind {
    pub fn command_name(self) -> &'static str {
        match self {
            DrawKind::Line => LineShape::TYPE,
            DrawKind::Rect => RectShape::TYPE,
            DrawKind::Ellipse => EllipseShape::TYPE,
            DrawKind::Splines => SplinesShape::TYPE,
        }
    }

    fn build(self, points: &[Point], closed: bool) -> Option<Box<dyn ShapeKind>> {
        let (first, last) = (*points.first()?, *points.last()?);
        Some(match self {
            DrawKind::Line => Box::new(LineShape::new(first, last)),
            DrawKind::Rect => Box::new(RectShape::from_corners(first, last)),
            DrawKind::Ellipse => Box::new(EllipseShape::from_corners(first, last)),
            DrawKind::Splines => Box::new(SplinesShape {
                points: points.to_vec(),
                closed,
            }),
        })
    }
}

/// Draws one shape per drag.
#[derive(Debug)]
pub struct DrawCommand {
    kind: DrawKind,
    params: DrawParams,
    /// Sampled model points of the drag in progress.
    points: Vec<Point>,
    /// Display position of the last kept sample.
    last_sample: Point,
    preview: Option<Shape>,
}

impl DrawCommand {
    pub fn new(kind: DrawKind) -> Self {
        Self {
            kind,
            params: DrawParams::default(),
            points: Vec::new(),
            last_sample: Point::ZERO,
            preview: None,
        }
    }

    pub fn kind(&self) -> DrawKind {
        self.kind
    }

    fn track(&mut self, env: &CommandEnv<'_>, motion: &Motion) {
        match self.kind {
            DrawKind::Splines => {
                if motion.point.distance(self.last_sample) >= env.config.min_spline_step {
                    self.points.push(motion.point_m);
                    self.last_sample = motion.point;
                }
            }
            _ => {
                self.points.truncate(1);
                self.points.push(motion.point_m);
            }
        }
        self.preview = self
            .kind
            .build(&self.points, false)
            .map(|kind| self.params.finish(kind, env.context));
    }
}

impl Command for DrawCommand {
    fn name(&self) -> &str {
        self.kind.command_name()
    }

    fn initialize(&mut self, env: &mut CommandEnv<'_>, params: &Value) -> bool {
        self.params = DrawParams::parse(params);
        if self.params.points.len() >= 2 {
            let Some(kind) = self.kind.build(&self.params.points, self.params.closed) else {
                return false;
            };
            let shape = self.params.finish(kind, env.context);
            return env.add_shape(shape).is_some();
        }
        true
    }

    fn cancel(&mut self, env: &mut CommandEnv<'_>) -> bool {
        self.points.clear();
        let had_preview = self.preview.take().is_some();
        env.redraw();
        had_preview
    }

    fn is_drawing(&self) -> bool {
        true
    }

    fn accepts(&self, env: &CommandEnv<'_>, _motion: &Motion) -> bool {
        !env.is_read_only()
    }

    fn click(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        self.preview.is_none() && select_clicked(env, motion)
    }

    fn touch_began(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if env.is_read_only() {
            return false;
        }
        self.points = vec![motion.start_pt_m];
        self.last_sample = motion.start_pt;
        self.track(env, motion);
        env.redraw();
        true
    }

    fn touch_moved(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if self.points.is_empty() {
            return false;
        }
        self.track(env, motion);
        env.redraw();
        true
    }

    fn touch_ended(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if self.points.is_empty() {
            return false;
        }
        if self.kind == DrawKind::Splines && self.points.last() != Some(&motion.point_m) {
            self.points.push(motion.point_m);
            self.preview = self
                .kind
                .build(&self.points, false)
                .map(|kind| self.params.finish(kind, env.context));
        } else {
            self.track(env, motion);
        }
        self.points.clear();
        env.redraw();

        let Some(shape) = self.preview.take() else {
            return false;
        };
        if !large_enough(&shape, motion.zoom, env.config.min_shape_size) {
            debug!("{} too small, discarded", self.name());
            return false;
        }
        env.add_shape(shape).is_some()
    }

    fn dynamic(&self, _shapes: &Shapes) -> DynamicData {
        DynamicData {
            shapes: self.preview.iter().cloned().collect(),
            ..DynamicData::default()
        }
    }
}

/// Polyline drawn one vertex per tap or drag; double tap finishes.
#[derive(Debug, Default)]
pub struct LinesCommand {
    params: DrawParams,
    /// Context captured from the view when the polyline started.
    base: ShapeContext,
    points: Vec<Point>,
    /// Rubber-band end following the finger.
    current: Option<Point>,
}

impl LinesCommand {
    pub const NAME: &'static str = LinesShape::TYPE;

    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, point: Point, motion: &Motion, min_size: f64) {
        match self.points.last() {
            Some(last) if last.distance(point) * motion.zoom < min_size => {}
            _ => self.points.push(point),
        }
    }

    fn shape(&self, closed: bool) -> Option<Shape> {
        let mut points = self.points.clone();
        points.extend(self.current);
        (points.len() >= 2)
            .then(|| self.params.finish(Box::new(LinesShape::new(points, closed)), &self.base))
    }

    fn start(&mut self, env: &CommandEnv<'_>, point: Point) {
        if self.points.is_empty() {
            self.base = env.context.clone();
            self.points.push(point);
        }
    }

    fn reset(&mut self, env: &mut CommandEnv<'_>) {
        self.points.clear();
        self.current = None;
        env.redraw();
    }
}

impl Command for LinesCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn initialize(&mut self, env: &mut CommandEnv<'_>, params: &Value) -> bool {
        self.params = DrawParams::parse(params);
        if self.params.points.len() >= 2 {
            let kind = LinesShape::new(self.params.points.clone(), self.params.closed);
            let shape = self.params.finish(Box::new(kind), env.context);
            return env.add_shape(shape).is_some();
        }
        true
    }

    fn cancel(&mut self, env: &mut CommandEnv<'_>) -> bool {
        let active = !self.points.is_empty();
        self.reset(env);
        active
    }

    fn is_drawing(&self) -> bool {
        true
    }

    fn accepts(&self, env: &CommandEnv<'_>, _motion: &Motion) -> bool {
        !env.is_read_only()
    }

    fn click(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if self.points.is_empty() && select_clicked(env, motion) {
            return true;
        }
        if env.is_read_only() {
            return false;
        }
        if self.points.is_empty() {
            self.start(env, motion.point_m);
        } else {
            self.push(motion.point_m, motion, env.config.min_shape_size);
        }
        env.redraw();
        true
    }

    fn double_click(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if self.points.is_empty() {
            return false;
        }
        self.current = None;
        self.push(motion.point_m, motion, env.config.min_shape_size);
        let shape = self.shape(self.params.closed);
        self.reset(env);
        match shape {
            Some(shape) => env.add_shape(shape).is_some(),
            None => {
                warn!("polyline needs two distinct points");
                false
            }
        }
    }

    fn touch_began(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if env.is_read_only() {
            return false;
        }
        self.start(env, motion.start_pt_m);
        self.current = Some(motion.point_m);
        env.redraw();
        true
    }

    fn touch_moved(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if self.current.is_none() {
            return false;
        }
        self.current = Some(motion.point_m);
        env.redraw();
        true
    }

    fn touch_ended(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if self.current.take().is_none() {
            return false;
        }
        self.push(motion.point_m, motion, env.config.min_shape_size);
        env.redraw();
        true
    }

    fn dynamic(&self, _shapes: &Shapes) -> DynamicData {
        let mut handles = self.points.clone();
        handles.extend(self.current);
        DynamicData {
            shapes: self.shape(false).into_iter().collect(),
            handles,
            ..DynamicData::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::document::ShapeDocument;
    use crate::gesture::{GestureKind, GestureState};

    fn motion(state: GestureState, start: Point, at: Point) -> Motion {
        Motion {
            kind: GestureKind::Pan,
            state,
            point: at,
            point_m: at,
            start_pt: start,
            start_pt_m: start,
            last_pt_m: at,
            ..Motion::default()
        }
    }

    fn drag(cmd: &mut dyn Command, env: &mut CommandEnv<'_>, path: &[Point]) -> bool {
        let start = path[0];
        cmd.touch_began(env, &motion(GestureState::Began, start, start));
        for p in &path[1..] {
            cmd.touch_moved(env, &motion(GestureState::Moved, start, *p));
        }
        let end = path[path.len() - 1];
        cmd.touch_ended(env, &motion(GestureState::Ended, start, end))
    }

    #[test]
    fn test_params_parse() {
        let params = DrawParams::parse(&json!({
            "lineWidth": 2.5,
            "lineStyle": 1,
            "lineRGB": 0x00FF00,
            "lineAlpha": 128,
            "fillARGB": 0xFF0000FFu32,
            "endArrowHead": 2,
            "locked": true,
            "tag": 9,
            "points": [1.0, 2.0, 3.0, 4.0, 5.0],
        }));
        assert!((params.context.line_width - 2.5).abs() < f64::EPSILON);
        assert_eq!(params.context.line_style, LineStyle::from_code(1).unwrap());
        assert!(params.mask.contains(ContextMask::LINE_ARGB | ContextMask::FILL_ARGB));
        assert_eq!(params.context.end_arrow, ArrowHead(2));
        assert!(params.flags.contains(ShapeFlags::LOCKED));
        assert_eq!(params.tag, 9);
        assert_eq!(params.points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);

        let base = ShapeContext {
            line_color: Argb(0xFF11_2233),
            ..ShapeContext::default()
        };
        let ctx = params.shape_context(&base);
        assert_eq!(ctx.line_color, Argb(0x8000_FF00));
        assert_eq!(ctx.fill_color, Argb(0xFF00_00FF));
    }

    #[test]
    fn test_line_drag_commits_once() {
        let mut doc = ShapeDocument::new();
        let ctx = ShapeContext::default();
        let config = KernelConfig::default();
        let mut cmd = DrawCommand::new(DrawKind::Line);
        let mut env = CommandEnv::new(&mut doc, &ctx, &config);

        let path = [Point::new(10.0, 10.0), Point::new(30.0, 30.0), Point::new(50.0, 50.0)];
        assert!(drag(&mut cmd, &mut env, &path));
        assert_eq!(env.effects.appended.len(), 1);
        assert!(cmd.dynamic(env.shapes()).shapes.is_empty());
        drop(env);

        let line = doc.shapes.iter().next().unwrap().downcast::<LineShape>().unwrap().clone();
        assert_eq!(line.start, Point::new(10.0, 10.0));
        assert_eq!(line.end, Point::new(50.0, 50.0));
    }

    #[test]
    fn test_tiny_shape_rejected() {
        let mut doc = ShapeDocument::new();
        let ctx = ShapeContext::default();
        let config = KernelConfig::default();
        let mut cmd = DrawCommand::new(DrawKind::Rect);
        let mut env = CommandEnv::new(&mut doc, &ctx, &config);
        assert!(!drag(&mut cmd, &mut env, &[Point::new(5.0, 5.0), Point::new(5.5, 5.5)]));
        assert!(!env.effects.modified);
    }

    #[test]
    fn test_cancel_discards_preview() {
        let mut doc = ShapeDocument::new();
        let ctx = ShapeContext::default();
        let config = KernelConfig::default();
        let mut cmd = DrawCommand::new(DrawKind::Ellipse);
        let mut env = CommandEnv::new(&mut doc, &ctx, &config);
        let start = Point::new(0.0, 0.0);
        cmd.touch_began(&mut env, &motion(GestureState::Began, start, start));
        cmd.touch_moved(&mut env, &motion(GestureState::Moved, start, Point::new(40.0, 20.0)));
        assert_eq!(cmd.dynamic(env.shapes()).shapes.len(), 1);
        assert!(cmd.cancel(&mut env));
        assert!(cmd.dynamic(env.shapes()).shapes.is_empty());
        assert!(!env.effects.modified);
    }

    #[test]
    fn test_splines_sample_spacing() {
        let mut doc = ShapeDocument::new();
        let ctx = ShapeContext::default();
        let config = KernelConfig::default();
        let mut cmd = DrawCommand::new(DrawKind::Splines);
        let mut env = CommandEnv::new(&mut doc, &ctx, &config);
        let path: Vec<Point> = (0..=20).map(|i| Point::new(i as f64 * 0.5, 0.0)).collect();
        assert!(drag(&mut cmd, &mut env, &path));
        drop(env);

        let shape = doc.shapes.iter().next().unwrap();
        let splines = shape.downcast::<SplinesShape>().unwrap();
        // Samples every 2 display pixels over a 10 pixel drag, plus the end point.
        assert_eq!(splines.points.len(), 6);
        assert_eq!(splines.points.last(), Some(&Point::new(10.0, 0.0)));
    }

    #[test]
    fn test_click_on_shape_switches_to_select() {
        let mut doc = ShapeDocument::new();
        let id = doc.make_mut().shapes.add(Shape::new(LineShape::new(
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
        )));
        let ctx = ShapeContext::default();
        let config = KernelConfig::default();
        let mut cmd = DrawCommand::new(DrawKind::Rect);
        let mut env = CommandEnv::new(&mut doc, &ctx, &config);
        let at = Point::new(50.0, 1.0);
        assert!(cmd.click(&mut env, &motion(GestureState::Ended, at, at)));
        assert_eq!(env.effects.switch_to, Some(("select".to_string(), json!({ "id": id }))));
    }

    #[test]
    fn test_lines_taps_then_double_tap() {
        let mut doc = ShapeDocument::new();
        let ctx = ShapeContext::default();
        let config = KernelConfig::default();
        let mut cmd = LinesCommand::new();
        let mut env = CommandEnv::new(&mut doc, &ctx, &config);

        for p in [Point::new(0.0, 0.0), Point::new(50.0, 0.0)] {
            assert!(cmd.click(&mut env, &motion(GestureState::Ended, p, p)));
        }
        assert!(!env.effects.modified);
        assert_eq!(cmd.dynamic(env.shapes()).handles.len(), 2);

        let end = Point::new(50.0, 50.0);
        assert!(cmd.double_click(&mut env, &motion(GestureState::Ended, end, end)));
        assert_eq!(env.effects.appended.len(), 1);
        drop(env);

        let shape = doc.shapes.iter().next().unwrap();
        assert_eq!(shape.point_count(), 3);
    }
}
