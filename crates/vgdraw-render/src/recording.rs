//! Command-list canvas and surface.
//!
//! [`RecordingCanvas`] keeps every drawing call as a [`CanvasOp`] instead of
//! rasterizing. It backs headless runs and lets tests compare what two passes
//! drew. A clear of the whole canvas discards earlier ops, the way a bitmap
//! would be overwritten.

use crate::renderer::{FrameInfo, Layer, RenderResult, RendererError, Surface};
use kurbo::{Point, Rect, Size};
use log::{debug, warn};
use parking_lot::Mutex;
use peniko::Color;
use std::sync::Arc;
use std::time::Duration;
use vgdraw_core::graphics::{Canvas, CanvasError, HandleKind, TextAlign};
use vgdraw_core::shapes::{Argb, LineStyle};

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasOp {
    Pen {
        color: Color,
        width: f64,
        style: LineStyle,
    },
    Brush(Color),
    Clear(Rect),
    Rect {
        rect: Rect,
        stroke: bool,
        fill: bool,
    },
    Line(Point, Point),
    Ellipse {
        rect: Rect,
        stroke: bool,
        fill: bool,
    },
    BeginPath,
    MoveTo(Point),
    LineTo(Point),
    CurveTo(Point, Point, Point),
    QuadTo(Point, Point),
    ClosePath,
    DrawPath {
        stroke: bool,
        fill: bool,
    },
    SaveClip,
    RestoreClip,
    ClipRect(Rect),
    ClipPath,
    Handle(Point, HandleKind),
    Bitmap {
        name: String,
        center: Point,
        size: Size,
        angle: f64,
    },
    Text {
        text: String,
        at: Point,
        align: TextAlign,
    },
}

#[derive(Debug, Clone)]
pub struct RecordingCanvas {
    size: Size,
    ops: Vec<CanvasOp>,
    painting: bool,
    /// Hardware-style canvases may refuse path clipping.
    clip_path_supported: bool,
    /// Simulated cost of one paint pass.
    paint_delay: Duration,
}

impl RecordingCanvas {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            ops: Vec::new(),
            painting: false,
            clip_path_supported: true,
            paint_delay: Duration::ZERO,
        }
    }

    pub fn with_clip_path(mut self, supported: bool) -> Self {
        self.clip_path_supported = supported;
        self
    }

    pub fn with_paint_delay(mut self, delay: Duration) -> Self {
        self.paint_delay = delay;
        self
    }

    pub fn ops(&self) -> &[CanvasOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<CanvasOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn set_clip_path_supported(&mut self, supported: bool) {
        self.clip_path_supported = supported;
    }

    /// Number of path strokes and fills issued.
    pub fn path_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, CanvasOp::DrawPath { .. } | CanvasOp::Rect { .. }))
            .count()
    }
}

impl Canvas for RecordingCanvas {
    fn begin_paint(&mut self) -> bool {
        if self.painting {
            warn!("nested paint pass refused");
            return false;
        }
        self.painting = true;
        if !self.paint_delay.is_zero() {
            std::thread::sleep(self.paint_delay);
        }
        true
    }

    fn end_paint(&mut self) {
        self.painting = false;
    }

    fn set_pen(&mut self, argb: Argb, width: f64, style: LineStyle, _phase: f64) {
        self.ops.push(CanvasOp::Pen {
            color: argb.into(),
            width,
            style,
        });
    }

    fn set_brush(&mut self, argb: Argb, _style: i32) {
        self.ops.push(CanvasOp::Brush(argb.into()));
    }

    fn clear_rect(&mut self, rect: Rect) {
        let full = Rect::from_origin_size(Point::ZERO, self.size);
        if rect.contains_rect(full) {
            self.ops.clear();
        }
        self.ops.push(CanvasOp::Clear(rect));
    }

    fn draw_rect(&mut self, rect: Rect, stroke: bool, fill: bool) {
        self.ops.push(CanvasOp::Rect { rect, stroke, fill });
    }

    fn draw_line(&mut self, from: Point, to: Point) {
        self.ops.push(CanvasOp::Line(from, to));
    }

    fn draw_ellipse(&mut self, rect: Rect, stroke: bool, fill: bool) {
        self.ops.push(CanvasOp::Ellipse { rect, stroke, fill });
    }

    fn begin_path(&mut self) {
        self.ops.push(CanvasOp::BeginPath);
    }

    fn move_to(&mut self, p: Point) {
        self.ops.push(CanvasOp::MoveTo(p));
    }

    fn line_to(&mut self, p: Point) {
        self.ops.push(CanvasOp::LineTo(p));
    }

    fn bezier_to(&mut self, c1: Point, c2: Point, p: Point) {
        self.ops.push(CanvasOp::CurveTo(c1, c2, p));
    }

    fn quad_to(&mut self, c: Point, p: Point) {
        self.ops.push(CanvasOp::QuadTo(c, p));
    }

    fn close_path(&mut self) {
        self.ops.push(CanvasOp::ClosePath);
    }

    fn draw_path(&mut self, stroke: bool, fill: bool) {
        self.ops.push(CanvasOp::DrawPath { stroke, fill });
    }

    fn save_clip(&mut self) {
        self.ops.push(CanvasOp::SaveClip);
    }

    fn restore_clip(&mut self) {
        self.ops.push(CanvasOp::RestoreClip);
    }

    fn clip_rect(&mut self, rect: Rect) -> bool {
        self.ops.push(CanvasOp::ClipRect(rect));
        rect.intersect(Rect::from_origin_size(Point::ZERO, self.size)).area() > 0.0
    }

    fn clip_path(&mut self) -> Result<bool, CanvasError> {
        if !self.clip_path_supported {
            return Err(CanvasError::Unsupported("clip_path".into()));
        }
        self.ops.push(CanvasOp::ClipPath);
        Ok(true)
    }

    fn draw_handle(&mut self, at: Point, kind: HandleKind) -> bool {
        self.ops.push(CanvasOp::Handle(at, kind));
        true
    }

    fn draw_bitmap(&mut self, name: &str, center: Point, size: Size, angle: f64) -> bool {
        self.ops.push(CanvasOp::Bitmap {
            name: name.to_string(),
            center,
            size,
            angle,
        });
        true
    }

    fn draw_text_at(&mut self, text: &str, at: Point, line_height: f64, align: TextAlign) -> f64 {
        self.ops.push(CanvasOp::Text {
            text: text.to_string(),
            at,
            align,
        });
        // Rough advance: half the line height per character.
        text.chars().count() as f64 * line_height * 0.5
    }
}

/// One presented frame of a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub info: FrameInfo,
    pub document: Vec<CanvasOp>,
    pub overlay: Vec<CanvasOp>,
}

/// Presented frames, shared between a surface and whoever inspects it.
pub type FrameSink = Arc<Mutex<Vec<PresentedFrame>>>;

/// A [`Surface`] built from recording canvases.
#[derive(Debug)]
pub struct RecordingSurface {
    size: Size,
    cache: Option<RecordingCanvas>,
    direct: RecordingCanvas,
    overlay: RecordingCanvas,
    /// Largest cache bitmap that can be allocated.
    max_cache: Size,
    software: bool,
    hardware_clip_path: bool,
    paint_delay: Duration,
    frames: FrameSink,
}

impl RecordingSurface {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            cache: None,
            direct: RecordingCanvas::new(size),
            overlay: RecordingCanvas::new(size),
            max_cache: Size::new(8192.0, 8192.0),
            software: false,
            hardware_clip_path: true,
            paint_delay: Duration::ZERO,
            frames: FrameSink::default(),
        }
    }

    /// Limit cache allocation; larger surfaces draw directly.
    pub fn with_max_cache(mut self, max: Size) -> Self {
        self.max_cache = max;
        self
    }

    /// Make the hardware path refuse clip paths.
    pub fn without_hardware_clip_path(mut self) -> Self {
        self.hardware_clip_path = false;
        self.direct.set_clip_path_supported(false);
        self
    }

    pub fn with_paint_delay(mut self, delay: Duration) -> Self {
        self.paint_delay = delay;
        self.direct = self.direct.with_paint_delay(delay);
        self
    }

    pub fn frames(&self) -> FrameSink {
        Arc::clone(&self.frames)
    }

    fn clip_path_supported(&self) -> bool {
        self.software || self.hardware_clip_path
    }
}

impl Surface for RecordingSurface {
    fn size(&self) -> Size {
        self.size
    }

    fn allocate_cache(&mut self) -> RenderResult<()> {
        if self.size.width > self.max_cache.width || self.size.height > self.max_cache.height {
            return Err(RendererError::Surface(format!(
                "cannot allocate {}x{} cache",
                self.size.width, self.size.height
            )));
        }
        if self.cache.is_none() {
            debug!("allocated {}x{} cache", self.size.width, self.size.height);
            let cache = RecordingCanvas::new(self.size)
                .with_paint_delay(self.paint_delay)
                .with_clip_path(self.clip_path_supported());
            self.cache = Some(cache);
        }
        Ok(())
    }

    fn canvas(&mut self, layer: Layer) -> &mut dyn Canvas {
        match (layer, &mut self.cache) {
            (Layer::Cache, Some(cache)) => cache,
            (Layer::Cache | Layer::Direct, _) => &mut self.direct,
            (Layer::Overlay, _) => &mut self.overlay,
        }
    }

    fn set_software(&mut self, software: bool) {
        self.software = software;
        let supported = self.clip_path_supported();
        self.direct.set_clip_path_supported(supported);
        if let Some(cache) = &mut self.cache {
            cache.set_clip_path_supported(supported);
        }
    }

    fn is_software(&self) -> bool {
        self.software
    }

    fn present(&mut self, info: FrameInfo) {
        let document = match (&self.cache, info.cached) {
            (Some(cache), true) => cache.ops().to_vec(),
            _ => self.direct.ops().to_vec(),
        };
        self.frames.lock().push(PresentedFrame {
            info,
            document,
            overlay: self.overlay.ops().to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_clear_discards_earlier_ops() {
        let mut canvas = RecordingCanvas::new(Size::new(100.0, 100.0));
        canvas.draw_line(Point::ZERO, Point::new(5.0, 5.0));
        canvas.clear_rect(Rect::new(10.0, 10.0, 20.0, 20.0));
        assert_eq!(canvas.ops().len(), 2);
        canvas.clear_rect(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(canvas.ops(), &[CanvasOp::Clear(Rect::new(0.0, 0.0, 100.0, 100.0))]);
    }

    #[test]
    fn test_hardware_clip_path_refused_until_software() {
        let mut surface = RecordingSurface::new(Size::new(50.0, 50.0)).without_hardware_clip_path();
        surface.allocate_cache().unwrap();
        assert!(surface.canvas(Layer::Cache).clip_path().is_err());
        assert!(surface.canvas(Layer::Direct).clip_path().is_err());
        surface.set_software(true);
        assert_eq!(surface.canvas(Layer::Cache).clip_path(), Ok(true));
        assert_eq!(surface.canvas(Layer::Direct).clip_path(), Ok(true));
    }

    #[test]
    fn test_oversized_cache_fails() {
        let mut surface =
            RecordingSurface::new(Size::new(500.0, 500.0)).with_max_cache(Size::new(100.0, 100.0));
        assert!(matches!(surface.allocate_cache(), Err(RendererError::Surface(_))));
        surface.canvas(Layer::Cache).draw_line(Point::ZERO, Point::new(1.0, 1.0));
        assert_eq!(surface.direct.ops().len(), 1);
    }

    #[test]
    fn test_present_snapshots_layers() {
        let mut surface = RecordingSurface::new(Size::new(50.0, 50.0));
        let frames = surface.frames();
        surface.canvas(Layer::Direct).draw_line(Point::ZERO, Point::new(1.0, 1.0));
        surface.canvas(Layer::Overlay).draw_handle(Point::new(2.0, 2.0), HandleKind::Vertex);
        surface.present(FrameInfo::default());
        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].document, vec![CanvasOp::Line(Point::ZERO, Point::new(1.0, 1.0))]);
        assert_eq!(frames[0].overlay.len(), 1);
    }
}
