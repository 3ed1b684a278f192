//! View transform between model and display coordinates.

use crate::config::KernelConfig;
use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Offset and scale mapping model coordinates onto the display.
///
/// `display = model * zoom + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub offset: Vec2,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
            min_zoom: 0.01,
            max_zoom: 20.0,
        }
    }
}

/// Two-finger state captured when a pinch begins.
#[derive(Debug, Clone, Copy)]
pub struct Pinch {
    start: Camera,
    mid: Point,
    distance: f64,
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self {
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            ..Self::default()
        }
    }

    /// Model to display.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.zoom)
    }

    /// Display to model.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.offset)
    }

    pub fn display_to_model(&self, point: Point) -> Point {
        self.inverse_transform() * point
    }

    pub fn model_to_display(&self, point: Point) -> Point {
        self.transform() * point
    }

    /// Convert a display distance to model units.
    pub fn display_to_model_len(&self, len: f64) -> f64 {
        len / self.zoom
    }

    /// Visible model rectangle for a viewport size.
    pub fn visible_model_rect(&self, viewport: Size) -> Rect {
        let inv = self.inverse_transform();
        Rect::from_points(inv * Point::ZERO, inv * Point::new(viewport.width, viewport.height))
    }

    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Scale about a display point, which stays fixed. Returns false if the
    /// zoom was already at its limit.
    pub fn zoom_at(&mut self, anchor: Point, factor: f64) -> bool {
        let zoom = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        if (zoom - self.zoom).abs() < f64::EPSILON {
            return false;
        }
        let model = self.display_to_model(anchor);
        self.zoom = zoom;
        self.offset = anchor.to_vec2() - model.to_vec2() * zoom;
        true
    }

    pub fn reset(&mut self) {
        self.offset = Vec2::ZERO;
        self.zoom = 1.0;
    }

    /// Show `bounds` centered in the viewport. An empty extent resets the view.
    pub fn fit_to_bounds(&mut self, bounds: Rect, viewport: Size, padding: f64) {
        if bounds.width() < f64::EPSILON && bounds.height() < f64::EPSILON {
            self.reset();
            self.offset = viewport.to_vec2() / 2.0 - bounds.center().to_vec2();
            return;
        }
        let room = Size::new(
            (viewport.width - padding * 2.0).max(1.0),
            (viewport.height - padding * 2.0).max(1.0),
        );
        let sx = room.width / bounds.width().max(f64::EPSILON);
        let sy = room.height / bounds.height().max(f64::EPSILON);
        self.zoom = sx.min(sy).clamp(self.min_zoom, self.max_zoom);
        self.offset = viewport.to_vec2() / 2.0 - bounds.center().to_vec2() * self.zoom;
    }

    pub fn begin_pinch(&self, p1: Point, p2: Point) -> Pinch {
        Pinch {
            start: *self,
            mid: p1.midpoint(p2),
            distance: p1.distance(p2),
        }
    }

    /// Apply a pinch relative to its start: the finger midpoint pans the view,
    /// the finger distance scales it around that midpoint.
    pub fn apply_pinch(&mut self, pinch: &Pinch, p1: Point, p2: Point) {
        *self = pinch.start;
        let mid = p1.midpoint(p2);
        self.pan(mid - pinch.mid);
        if pinch.distance > 1.0 {
            self.zoom_at(mid, p1.distance(p2) / pinch.distance);
        }
    }
}
