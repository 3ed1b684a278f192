//! Background repaint worker for one surface.
//!
//! Requests are coalesced, not queued: one slot for a full regenerate, one
//! bounded list of appended shapes, one flag for the overlay. The worker
//! takes whatever is pending, acquires a snapshot of the view in one short
//! critical section, and draws with no kernel lock held.

use crate::renderer::{FrameInfo, Layer, RenderResult, RendererError, Surface};
use kurbo::BezPath;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use vgdraw_core::config::KernelConfig;
use vgdraw_core::document::DocumentData;
use vgdraw_core::graphics::{CanvasError, GraphicsContext};
use vgdraw_core::notify::Notification;
use vgdraw_core::shapes::ShapeId;
use vgdraw_core::view::{CoreView, Snapshot};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Appended shapes kept before falling back to a full regenerate.
    pub append_capacity: usize,
    /// Zoom to fit after the first regenerate of a non-empty document.
    pub fit_on_first_regen: bool,
    /// Emit the first-regen notification. Only the main surface does.
    pub notify_first_regen: bool,
    pub stop_timeout: Duration,
}

impl SchedulerOptions {
    pub fn from_config(config: &KernelConfig) -> Self {
        Self {
            append_capacity: config.append_capacity.max(1),
            fit_on_first_regen: config.fit_on_first_regen,
            notify_first_regen: true,
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&KernelConfig::default())
    }
}

/// Counters kept by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub frames: usize,
    pub regens: usize,
    pub appends: usize,
    pub dynamics: usize,
    /// Passes that switched to the software path.
    pub fallbacks: usize,
    /// Passes skipped for want of a graphics slot.
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct Requests {
    /// Pending full regenerate; true if the content changed.
    regen: Option<bool>,
    appends: Vec<ShapeId>,
    dynamic: bool,
    stopping: bool,
    busy: bool,
    finished: bool,
}

#[derive(Debug, Default)]
struct Batch {
    regen: Option<bool>,
    appends: Vec<ShapeId>,
    dynamic: bool,
}

impl Requests {
    fn has_work(&self) -> bool {
        self.regen.is_some() || !self.appends.is_empty() || self.dynamic
    }

    fn request_regen(&mut self, changed: bool) {
        self.regen = Some(self.regen.unwrap_or(false) || changed);
        // A full pass covers every append.
        self.appends.clear();
    }

    /// Returns false when the append became part of a full regenerate.
    fn request_append(&mut self, id: ShapeId, capacity: usize) -> bool {
        if self.regen.is_some() {
            return false;
        }
        if self.appends.contains(&id) {
            return true;
        }
        if self.appends.len() >= capacity {
            debug!("append list full, regenerating");
            self.request_regen(true);
            return false;
        }
        self.appends.push(id);
        true
    }

    fn take(&mut self) -> Batch {
        Batch {
            regen: self.regen.take(),
            appends: std::mem::take(&mut self.appends),
            dynamic: std::mem::take(&mut self.dynamic),
        }
    }
}

struct Shared {
    requests: Mutex<Requests>,
    wake: Condvar,
    idle: Condvar,
    stats: Mutex<RenderStats>,
    options: SchedulerOptions,
}

pub struct RenderScheduler {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RenderScheduler {
    /// Spawn the worker for `surface`. It exits on its own once the view is
    /// dropped or stopping.
    pub fn start(
        name: &str,
        view: Weak<CoreView>,
        surface: Box<dyn Surface>,
        options: SchedulerOptions,
    ) -> RenderResult<Self> {
        let shared = Arc::new(Shared {
            requests: Mutex::new(Requests::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            stats: Mutex::new(RenderStats::default()),
            options,
        });
        let worker = Worker {
            name: name.to_string(),
            shared: Arc::clone(&shared),
            view,
            surface,
            cache_valid: false,
            first_regen: false,
        };
        let handle = std::thread::Builder::new()
            .name(format!("vgdraw-render-{name}"))
            .spawn(move || worker.run())
            .map_err(|e| RendererError::InitFailed(e.to_string()))?;
        info!("render scheduler {name} started");
        Ok(Self {
            name: name.to_string(),
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_requests(&self, f: impl FnOnce(&mut Requests) -> bool) -> bool {
        let mut requests = self.shared.requests.lock();
        if requests.stopping {
            return false;
        }
        let accepted = f(&mut requests);
        self.shared.wake.notify_one();
        accepted
    }

    /// Repaint the whole document. Coalesces with a pending request.
    pub fn request_regen(&self, changed: bool) -> bool {
        self.with_requests(|r| {
            r.request_regen(changed);
            true
        })
    }

    /// Paint one appended shape over the cached document. Returns false if
    /// the request was folded into a full regenerate.
    pub fn request_append(&self, id: ShapeId) -> bool {
        let capacity = self.shared.options.append_capacity;
        self.with_requests(|r| r.request_append(id, capacity))
    }

    pub fn request_dynamic(&self) -> bool {
        self.with_requests(|r| {
            r.dynamic = true;
            true
        })
    }

    pub fn stats(&self) -> RenderStats {
        *self.shared.stats.lock()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.requests.lock().stopping
    }

    /// Wait until nothing is pending or painting. False on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requests = self.shared.requests.lock();
        while (requests.busy || requests.has_work()) && !requests.finished {
            if self.shared.idle.wait_until(&mut requests, deadline).timed_out() {
                return false;
            }
        }
        true
    }

    /// Mark stopping, wake the worker and wait up to `timeout`. A worker
    /// still painting after that is left to finish on its own.
    pub fn stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requests = self.shared.requests.lock();
        requests.stopping = true;
        requests.take();
        self.shared.wake.notify_all();
        while !requests.finished {
            if self.shared.idle.wait_until(&mut requests, deadline).timed_out() {
                break;
            }
        }
        let finished = requests.finished;
        drop(requests);

        let handle = self.handle.lock().take();
        if finished {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("render worker {} panicked", self.name);
                }
            }
        } else if handle.is_some() {
            warn!("render worker {} did not stop within {timeout:?}", self.name);
        }
        finished
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        if self.handle.lock().is_some() {
            self.stop(self.shared.options.stop_timeout);
        }
    }
}

struct Worker {
    name: String,
    shared: Arc<Shared>,
    view: Weak<CoreView>,
    surface: Box<dyn Surface>,
    /// The cache bitmap holds a complete document layer.
    cache_valid: bool,
    first_regen: bool,
}

impl Worker {
    fn next_batch(&self) -> Option<Batch> {
        let mut requests = self.shared.requests.lock();
        requests.busy = false;
        loop {
            if requests.stopping {
                return None;
            }
            if requests.has_work() {
                requests.busy = true;
                return Some(requests.take());
            }
            self.shared.idle.notify_all();
            self.shared.wake.wait(&mut requests);
        }
    }

    fn run(mut self) {
        while let Some(batch) = self.next_batch() {
            let Some(view) = self.view.upgrade() else {
                debug!("{}: view gone, worker exiting", self.name);
                break;
            };
            let Some(snapshot) = view.acquire_snapshot() else {
                debug!("{}: view stopping, worker exiting", self.name);
                break;
            };
            let regenerated = self.paint(&batch, &snapshot);
            let has_content = !snapshot.doc.shapes.is_empty();
            drop(snapshot);

            if regenerated && !self.first_regen {
                self.first_regen = true;
                if self.shared.options.notify_first_regen {
                    view.notifier().emit(&Notification::FirstRegen);
                }
                if self.shared.options.fit_on_first_regen && has_content {
                    view.zoom_to_extent();
                }
            }
        }
        let mut requests = self.shared.requests.lock();
        requests.busy = false;
        requests.finished = true;
        self.shared.idle.notify_all();
    }

    /// Draw one coalesced batch. Returns true if the document was regenerated.
    fn paint(&mut self, batch: &Batch, snapshot: &Snapshot) -> bool {
        let Some(gc) = &snapshot.graphics else {
            warn!("{}: no graphics slot, frame skipped", self.name);
            self.shared.stats.lock().skipped += 1;
            return false;
        };
        let doc: &DocumentData = &snapshot.doc;
        let full = batch.regen.is_some() || (!batch.appends.is_empty() && !self.cache_valid);
        let mut cached = self.cache_valid;

        if full {
            cached = self.regenerate(gc, doc);
            self.cache_valid = cached;
            self.shared.stats.lock().regens += 1;
        } else if !batch.appends.is_empty() {
            let drawn = self.append(gc, doc, &batch.appends);
            self.shared.stats.lock().appends += drawn;
        }

        if let Some(mut gs) = gc.paint(self.surface.canvas(Layer::Overlay)) {
            gs.clear();
            snapshot.dynamic.draw(&mut gs);
        }
        if batch.dynamic {
            self.shared.stats.lock().dynamics += 1;
        }

        self.surface.present(FrameInfo {
            change_count: doc.change_count(),
            shape_count: doc.shapes.len(),
            cached,
            software: self.surface.is_software(),
        });
        self.shared.stats.lock().frames += 1;
        full
    }

    /// Full repaint of the document layer. Falls back to the software path
    /// once if the canvas refuses an operation. Returns whether the cache
    /// bitmap was used.
    fn regenerate(&mut self, gc: &GraphicsContext, doc: &DocumentData) -> bool {
        match self.draw_document(gc, doc) {
            Ok(cached) => cached,
            Err(e) if !self.surface.is_software() => {
                warn!("{}: {e}, switching to software drawing", self.name);
                self.surface.set_software(true);
                self.shared.stats.lock().fallbacks += 1;
                self.draw_document(gc, doc).unwrap_or_else(|e| {
                    warn!("{}: software drawing failed: {e}", self.name);
                    false
                })
            }
            Err(e) => {
                warn!("{}: drawing failed: {e}", self.name);
                false
            }
        }
    }

    /// Cache layer when a cache bitmap can be had, direct drawing otherwise.
    fn document_layer(&mut self) -> Layer {
        match self.surface.allocate_cache() {
            Ok(()) => Layer::Cache,
            Err(e) => {
                debug!("{}: {e}, drawing directly", self.name);
                Layer::Direct
            }
        }
    }

    fn draw_document(&mut self, gc: &GraphicsContext, doc: &DocumentData) -> Result<bool, CanvasError> {
        let visible = gc.xform().inverse().transform_rect_bbox(gc.clip());
        let clip: BezPath = kurbo::Shape::to_path(&visible, 0.1);
        let layer = self.document_layer();
        let Some(mut gs) = gc.paint(self.surface.canvas(layer)) else {
            return Err(CanvasError::Failed("surface refused paint".into()));
        };
        gs.clear();
        if let Err(e) = gs.set_clip_path(&clip) {
            gs.restore_clip();
            return Err(e);
        }
        let drawn = doc.shapes.iter().filter(|s| s.draw(&mut gs)).count();
        gs.restore_clip();
        debug!("regenerated {drawn}/{} shapes", doc.shapes.len());
        Ok(layer == Layer::Cache)
    }

    /// Paint appended shapes over the cache. Ids no longer in the document
    /// are skipped.
    fn append(&mut self, gc: &GraphicsContext, doc: &DocumentData, ids: &[ShapeId]) -> usize {
        if let Err(e) = self.surface.allocate_cache() {
            warn!("{}: cache lost: {e}", self.name);
            self.cache_valid = false;
            return 0;
        }
        let Some(mut gs) = gc.paint(self.surface.canvas(Layer::Cache)) else {
            return 0;
        };
        ids.iter()
            .filter_map(|id| doc.shapes.get(*id))
            .filter(|s| s.draw(&mut gs))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{CanvasOp, FrameSink, RecordingSurface};
    use kurbo::{Point, Size};
    use vgdraw_core::gesture::{GestureKind, GestureSink, GestureState};

    fn view_with_shapes(count: usize) -> Arc<CoreView> {
        let view = CoreView::new(KernelConfig::default());
        view.set_viewport(Size::new(400.0, 300.0));
        for i in 0..count {
            let y = 20.0 + i as f64 * 30.0;
            view.set_command_with("line", &format!(r#"{{"points":[10,{y},200,{y}]}}"#));
        }
        view
    }

    fn start(view: &Arc<CoreView>, surface: RecordingSurface, options: SchedulerOptions) -> (RenderScheduler, FrameSink) {
        let frames = surface.frames();
        let scheduler =
            RenderScheduler::start("test", Arc::downgrade(view), Box::new(surface), options).unwrap();
        (scheduler, frames)
    }

    fn no_fit() -> SchedulerOptions {
        SchedulerOptions {
            fit_on_first_regen: false,
            ..SchedulerOptions::default()
        }
    }

    #[test]
    fn test_requests_coalesce() {
        let mut requests = Requests::default();
        assert!(requests.request_append(1, 2));
        assert!(requests.request_append(1, 2));
        assert!(requests.request_append(2, 2));
        assert_eq!(requests.appends, vec![1, 2]);
        assert!(!requests.request_append(3, 2));
        assert_eq!(requests.regen, Some(true));
        assert!(requests.appends.is_empty());
        assert!(!requests.request_append(4, 2));

        let mut requests = Requests::default();
        requests.request_regen(false);
        requests.request_regen(false);
        assert_eq!(requests.regen, Some(false));
        requests.request_regen(true);
        requests.request_regen(false);
        assert_eq!(requests.take().regen, Some(true));
        assert!(!requests.has_work());
    }

    #[test]
    fn test_first_regen_notifies_once_and_fits() {
        let view = view_with_shapes(2);
        let (_, rx) = view.notifier().subscribe_channel();
        let (scheduler, frames) = start(&view, RecordingSurface::new(Size::new(400.0, 300.0)), SchedulerOptions::default());

        assert!(scheduler.request_regen(true));
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert!(scheduler.request_regen(false));
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        let events: Vec<Notification> = rx.try_iter().collect();
        let firsts = events.iter().filter(|n| **n == Notification::FirstRegen).count();
        assert_eq!(firsts, 1);
        assert!(events.iter().any(|n| matches!(n, Notification::ZoomChanged(_))));
        assert!((view.camera().zoom - 1.0).abs() > f64::EPSILON);

        let frames = frames.lock();
        let last = frames.last().unwrap();
        assert_eq!(last.info.shape_count, 2);
        assert!(last.info.cached);
        assert!(scheduler.stop(Duration::from_secs(1)));
    }

    #[test]
    fn test_regen_twice_is_identical() {
        let view = view_with_shapes(3);
        let (scheduler, frames) = start(&view, RecordingSurface::new(Size::new(400.0, 300.0)), no_fit());
        scheduler.request_regen(true);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        scheduler.request_regen(false);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        let frames = frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
        assert!(frames[0].document.iter().any(|op| matches!(op, CanvasOp::DrawPath { .. })));
    }

    #[test]
    fn test_append_paints_over_cache() {
        let view = view_with_shapes(1);
        let (scheduler, frames) = start(&view, RecordingSurface::new(Size::new(400.0, 300.0)), no_fit());
        scheduler.request_regen(true);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        view.set_command_with("rect", r#"{"points":[50,100,150,200]}"#);
        let id = *view.acquire_front_doc().shapes.ids().last().unwrap();
        assert!(scheduler.request_append(id));
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        let stats = scheduler.stats();
        assert_eq!(stats.regens, 1);
        assert_eq!(stats.appends, 1);
        let frames = frames.lock();
        let (first, second) = (&frames[0], &frames[1]);
        assert!(second.info.cached);
        assert_eq!(second.info.shape_count, 2);
        assert_eq!(&second.document[..first.document.len()], &first.document[..]);
        assert!(second.document.len() > first.document.len());
    }

    #[test]
    fn test_append_without_cache_regenerates() {
        let view = view_with_shapes(1);
        let (scheduler, frames) = start(&view, RecordingSurface::new(Size::new(400.0, 300.0)), no_fit());
        let id = view.acquire_front_doc().shapes.ids()[0];
        scheduler.request_append(id);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(scheduler.stats().regens, 1);
        assert_eq!(frames.lock().len(), 1);
    }

    #[test]
    fn test_oversized_surface_draws_directly() {
        let view = view_with_shapes(1);
        let surface = RecordingSurface::new(Size::new(400.0, 300.0)).with_max_cache(Size::new(100.0, 100.0));
        let (scheduler, frames) = start(&view, surface, no_fit());
        scheduler.request_regen(true);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        let frames = frames.lock();
        assert!(!frames[0].info.cached);
        assert!(frames[0].document.iter().any(|op| matches!(op, CanvasOp::DrawPath { .. })));
    }

    #[test]
    fn test_clip_failure_falls_back_to_software() {
        let view = view_with_shapes(1);
        let surface = RecordingSurface::new(Size::new(400.0, 300.0)).without_hardware_clip_path();
        let (scheduler, frames) = start(&view, surface, no_fit());
        scheduler.request_regen(true);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        scheduler.request_regen(false);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        assert_eq!(scheduler.stats().fallbacks, 1);
        let frames = frames.lock();
        assert!(frames.iter().all(|f| f.info.software));
        assert!(frames[0].document.contains(&CanvasOp::ClipPath));
    }

    #[test]
    fn test_dynamic_redraw_leaves_document_layer() {
        let view = view_with_shapes(1);
        let (scheduler, frames) = start(&view, RecordingSurface::new(Size::new(400.0, 300.0)), no_fit());
        scheduler.request_regen(true);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        view.set_command("line");
        let start = Point::new(20.0, 250.0);
        view.on_gesture(GestureKind::Pan, GestureState::Possible, start, false);
        view.on_gesture(GestureKind::Pan, GestureState::Began, start, false);
        view.on_gesture(GestureKind::Pan, GestureState::Moved, Point::new(120.0, 260.0), false);
        scheduler.request_dynamic();
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        let stats = scheduler.stats();
        assert_eq!(stats.regens, 1);
        assert_eq!(stats.dynamics, 1);
        let frames = frames.lock();
        assert_eq!(frames[1].document, frames[0].document);
        assert!(frames[0].overlay.iter().all(|op| matches!(op, CanvasOp::Clear(_))));
        assert!(frames[1].overlay.iter().any(|op| matches!(op, CanvasOp::DrawPath { .. })));
    }

    #[test]
    fn test_slow_paint_sees_one_version() {
        let view = view_with_shapes(1);
        let before = view.change_count();
        let surface = RecordingSurface::new(Size::new(400.0, 300.0)).with_paint_delay(Duration::from_millis(150));
        let (scheduler, frames) = start(&view, surface, no_fit());
        scheduler.request_regen(true);

        // Commit while the worker is inside its paint pass.
        std::thread::sleep(Duration::from_millis(50));
        view.set_command_with("line", r#"{"points":[10,200,200,200]}"#);
        assert_eq!(view.change_count(), before + 1);

        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        let frames = frames.lock();
        assert_eq!(frames[0].info.change_count, before);
        assert_eq!(frames[0].info.shape_count, 1);
        let strokes = frames[0].document.iter().filter(|op| matches!(op, CanvasOp::DrawPath { .. })).count();
        assert_eq!(strokes, 1);
    }

    #[test]
    fn test_worker_exits_when_view_dropped() {
        let view = view_with_shapes(1);
        let (scheduler, frames) = start(&view, RecordingSurface::new(Size::new(400.0, 300.0)), no_fit());
        drop(view);
        scheduler.request_regen(true);
        assert!(scheduler.stop(Duration::from_secs(1)));
        assert!(frames.lock().is_empty());
        assert!(!scheduler.request_regen(true));
    }

    #[test]
    fn test_stop_is_bounded() {
        let view = view_with_shapes(1);
        let surface = RecordingSurface::new(Size::new(400.0, 300.0)).with_paint_delay(Duration::from_millis(500));
        let (scheduler, _frames) = start(&view, surface, no_fit());
        scheduler.request_regen(true);
        std::thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        assert!(!scheduler.stop(Duration::from_millis(20)));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(scheduler.is_stopping());
    }
}
