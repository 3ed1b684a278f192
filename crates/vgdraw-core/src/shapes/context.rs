//! Pen and brush attributes carried by every shape.

use bitflags::bitflags;
use peniko::Color;
use serde::{Deserialize, Serialize};

/// Packed colour, bytes from high to low are A, R, G, B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Argb(pub u32);

impl Argb {
    pub const BLACK: Argb = Argb(0xFF00_0000);
    pub const TRANSPARENT: Argb = Argb(0);

    pub fn new(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self((a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32)
    }

    pub fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// RGB part without alpha.
    pub fn rgb(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn with_alpha(self, alpha: u8) -> Self {
        Self(self.rgb() | (alpha as u32) << 24)
    }

    pub fn with_rgb(self, rgb: u32) -> Self {
        Self((self.0 & 0xFF00_0000) | (rgb & 0x00FF_FFFF))
    }

    pub fn is_transparent(self) -> bool {
        self.alpha() == 0
    }
}

impl From<Color> for Argb {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Argb::new(rgba.a, rgba.r, rgba.g, rgba.b)
    }
}

impl From<Argb> for Color {
    fn from(argb: Argb) -> Self {
        let v = argb.0;
        Color::from_rgba8((v >> 16) as u8, (v >> 8) as u8, v as u8, (v >> 24) as u8)
    }
}

/// Line dash style. The numeric values are the canvas style codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineStyle {
    #[default]
    Solid = 0,
    Dash = 1,
    Dot = 2,
    DashDot = 3,
    DashDotDot = 4,
    Null = 5,
}

impl LineStyle {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(LineStyle::Solid),
            1 => Some(LineStyle::Dash),
            2 => Some(LineStyle::Dot),
            3 => Some(LineStyle::DashDot),
            4 => Some(LineStyle::DashDotDot),
            5 => Some(LineStyle::Null),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Cycle to the next line style.
    pub fn next(self) -> Self {
        match self {
            LineStyle::Solid => LineStyle::Dash,
            LineStyle::Dash => LineStyle::Dot,
            LineStyle::Dot => LineStyle::DashDot,
            LineStyle::DashDot => LineStyle::DashDotDot,
            LineStyle::DashDotDot => LineStyle::Null,
            LineStyle::Null => LineStyle::Solid,
        }
    }
}

/// Arrowhead drawn at a line end. Zero means none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArrowHead(pub u8);

bitflags! {
    /// Which `ShapeContext` fields an edit touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ContextMask: u32 {
        const LINE_RGB = 0x01;
        const LINE_ALPHA = 0x02;
        const LINE_WIDTH = 0x04;
        const LINE_STYLE = 0x08;
        const FILL_RGB = 0x10;
        const FILL_ALPHA = 0x20;
        const START_ARROW = 0x40;
        const END_ARROW = 0x80;
        const LINE_ARGB = Self::LINE_RGB.bits() | Self::LINE_ALPHA.bits();
        const FILL_ARGB = Self::FILL_RGB.bits() | Self::FILL_ALPHA.bits();
        const ARROWS = Self::START_ARROW.bits() | Self::END_ARROW.bits();
    }
}

/// Pen and brush attributes of a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeContext {
    pub line_color: Argb,
    /// Line width in model units. Negative values are display pixels.
    pub line_width: f64,
    #[serde(default)]
    pub line_style: LineStyle,
    #[serde(default)]
    pub fill_color: Argb,
    #[serde(default)]
    pub start_arrow: ArrowHead,
    #[serde(default)]
    pub end_arrow: ArrowHead,
}

impl Default for ShapeContext {
    fn default() -> Self {
        Self {
            line_color: Argb::BLACK,
            line_width: 1.0,
            line_style: LineStyle::Solid,
            fill_color: Argb::TRANSPARENT,
            start_arrow: ArrowHead::default(),
            end_arrow: ArrowHead::default(),
        }
    }
}

impl ShapeContext {
    pub fn has_fill(&self) -> bool {
        !self.fill_color.is_transparent()
    }

    pub fn is_null_line(&self) -> bool {
        self.line_style == LineStyle::Null || self.line_color.is_transparent()
    }

    /// Width in display pixels for a view scale.
    pub fn display_width(&self, zoom: f64) -> f64 {
        if self.line_width < 0.0 {
            -self.line_width
        } else {
            (self.line_width * zoom).max(0.5)
        }
    }

    /// Copy the fields selected by `mask` from `other`.
    pub fn merge(&mut self, other: &ShapeContext, mask: ContextMask) {
        if mask.contains(ContextMask::LINE_RGB) {
            self.line_color = self.line_color.with_rgb(other.line_color.rgb());
        }
        if mask.contains(ContextMask::LINE_ALPHA) {
            self.line_color = self.line_color.with_alpha(other.line_color.alpha());
        }
        if mask.contains(ContextMask::LINE_WIDTH) {
            self.line_width = other.line_width;
        }
        if mask.contains(ContextMask::LINE_STYLE) {
            self.line_style = other.line_style;
        }
        if mask.contains(ContextMask::FILL_RGB) {
            self.fill_color = self.fill_color.with_rgb(other.fill_color.rgb());
        }
        if mask.contains(ContextMask::FILL_ALPHA) {
            self.fill_color = self.fill_color.with_alpha(other.fill_color.alpha());
        }
        if mask.contains(ContextMask::START_ARROW) {
            self.start_arrow = other.start_arrow;
        }
        if mask.contains(ContextMask::END_ARROW) {
            self.end_arrow = other.end_arrow;
        }
    }
}
