//! vgdraw render library
//!
//! Background render schedulers that paint snapshots of a [`CoreView`]
//! onto [`Surface`]s, and the [`ViewAdapter`] that hosts a view. The
//! recording surface stands in for a platform canvas in tests and in the
//! headless replay tool.
//!
//! [`CoreView`]: vgdraw_core::CoreView

mod adapter;
mod recording;
mod renderer;
mod scheduler;

pub use adapter::ViewAdapter;
pub use recording::{CanvasOp, FrameSink, PresentedFrame, RecordingCanvas, RecordingSurface};
pub use renderer::{FrameInfo, Layer, RenderResult, RendererError, Surface};
pub use scheduler::{RenderScheduler, RenderStats, SchedulerOptions};
