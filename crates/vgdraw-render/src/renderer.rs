//! Surface abstraction.

use kurbo::Size;
use thiserror::Error;
use vgdraw_core::graphics::Canvas;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),
    #[error("Render failed: {0}")]
    RenderFailed(String),
    #[error("Surface error: {0}")]
    Surface(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// What a presented frame shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    /// Change count of the document that was drawn.
    pub change_count: u64,
    pub shape_count: usize,
    /// The document layer came from the cache bitmap.
    pub cached: bool,
    pub software: bool,
}

/// Layers of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// The document cache bitmap. Falls back to `Direct` while no cache is
    /// allocated.
    Cache,
    /// Drawing straight onto the surface.
    Direct,
    Overlay,
}

/// A presentable drawing surface owned by one render scheduler.
///
/// The document layer is painted into a cache bitmap when one can be
/// allocated, or straight onto the surface otherwise. The overlay is a
/// separate layer repainted on its own.
pub trait Surface: Send {
    fn size(&self) -> Size;

    /// Make sure the cache bitmap exists. Fails when it cannot be allocated.
    fn allocate_cache(&mut self) -> RenderResult<()>;

    fn canvas(&mut self, layer: Layer) -> &mut dyn Canvas;

    /// Switch to the software drawing path. Called once after a hardware
    /// canvas reported an unsupported operation.
    fn set_software(&mut self, software: bool);

    fn is_software(&self) -> bool;

    /// Show the current layers.
    fn present(&mut self, info: FrameInfo);
}
