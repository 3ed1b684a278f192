//! Eraser.

use super::{Command, CommandEnv, Motion};
use crate::container::Shapes;
use crate::dynamic::DynamicData;
use crate::shapes::ShapeId;
use kurbo::{Point, Rect};
use log::debug;

/// Tap deletes the shape under the finger; a drag deletes everything the
/// box touches when the finger lifts.
#[derive(Debug, Default)]
pub struct EraseCommand {
    drag: Option<(Point, Point)>,
}

impl EraseCommand {
    pub const NAME: &'static str = "erase";

    pub fn new() -> Self {
        Self::default()
    }

    fn marquee(&self) -> Option<Rect> {
        self.drag.map(|(a, b)| Rect::from_points(a, b))
    }
}

impl Command for EraseCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn cancel(&mut self, env: &mut CommandEnv<'_>) -> bool {
        env.redraw();
        self.drag.take().is_some()
    }

    fn accepts(&self, env: &CommandEnv<'_>, _motion: &Motion) -> bool {
        !env.is_read_only()
    }

    fn click(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        let Some(id) = env.shapes().hit_test(motion.point_m, motion.tolerance_m()) else {
            return false;
        };
        debug!("erase shape {id}");
        !env.delete_shapes(&[id]).is_empty()
    }

    fn touch_began(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        if env.is_read_only() {
            return false;
        }
        self.drag = Some((motion.start_pt_m, motion.point_m));
        env.redraw();
        true
    }

    fn touch_moved(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        let Some((_, current)) = self.drag.as_mut() else {
            return false;
        };
        *current = motion.point_m;
        env.redraw();
        true
    }

    fn touch_ended(&mut self, env: &mut CommandEnv<'_>, motion: &Motion) -> bool {
        let Some((start, _)) = self.drag.take() else {
            return false;
        };
        env.redraw();
        let ids: Vec<ShapeId> = env.shapes().shapes_in_rect(Rect::from_points(start, motion.point_m));
        debug!("erase {} shapes in box", ids.len());
        !env.delete_shapes(&ids).is_empty()
    }

    fn dynamic(&self, _shapes: &Shapes) -> DynamicData {
        DynamicData {
            marquee: self.marquee(),
            ..DynamicData::default()
        }
    }
}
