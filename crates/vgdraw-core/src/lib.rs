//! vgdraw core library
//!
//! Shape documents, the command state machine that edits them, gesture
//! dispatch, and undo/record logs. Rendering lives in `vgdraw-render`; this
//! crate only defines the [`graphics::Canvas`] seam it draws through.

pub mod camera;
pub mod commands;
pub mod config;
pub mod container;
pub mod document;
pub mod dynamic;
pub mod gesture;
pub mod graphics;
pub mod notify;
pub mod record;
pub mod registry;
pub mod shapes;
pub mod storage;
pub mod view;

pub use camera::Camera;
pub use commands::{Command, CommandEnv, CommandManager, Effects, Motion};
pub use config::{ConfigError, GestureConfig, KernelConfig};
pub use container::Shapes;
pub use document::{DocumentData, ShapeDocument};
pub use dynamic::{DynamicData, DynamicShapeSet};
pub use gesture::{GestureDispatcher, GestureKind, GestureSink, GestureState};
pub use graphics::{Canvas, CanvasError, Graphics, GraphicsContext, GraphicsPool};
pub use notify::{Notification, Notifier, Subscription};
pub use record::{RecordEngine, RecordFrame, RecordKind, RecordTarget, RecordedFrame};
pub use registry::ViewRegistry;
pub use shapes::{Shape, ShapeContext, ShapeId, ShapeKind, ShapeRegistry};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError, StorageResult};
pub use view::{CoreView, Snapshot, ViewHost};
