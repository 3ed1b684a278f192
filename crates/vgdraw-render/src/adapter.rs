//! Wiring between a kernel view and its workers.
//!
//! A [`ViewAdapter`] is the view's host: repaint requests fan out to the
//! render schedulers of every attached surface, and committed states are
//! queued to the undo and record engines. The view only holds the adapter
//! weakly.

use crate::renderer::{RenderResult, Surface};
use crate::scheduler::{RenderScheduler, RenderStats, SchedulerOptions};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use vgdraw_core::notify::Notification;
use vgdraw_core::record::{RecordCallback, RecordEngine, RecordFrame, RecordKind, RecordTarget};
use vgdraw_core::shapes::ShapeId;
use vgdraw_core::storage::Storage;
use vgdraw_core::view::{CoreView, ViewHost};

pub struct ViewAdapter {
    view: Arc<CoreView>,
    schedulers: RwLock<Vec<RenderScheduler>>,
    undo: Mutex<Option<RecordEngine>>,
    record: Mutex<Option<RecordEngine>>,
    /// Change count of the last state queued for history.
    last_recorded: AtomicU64,
}

impl std::fmt::Debug for ViewAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewAdapter")
            .field("view", &self.view.id())
            .field("surfaces", &self.schedulers.read().len())
            .finish()
    }
}

impl ViewAdapter {
    /// Become the host of `view`.
    pub fn new(view: Arc<CoreView>) -> Arc<Self> {
        let adapter = Arc::new(Self {
            last_recorded: AtomicU64::new(view.change_count()),
            view,
            schedulers: RwLock::new(Vec::new()),
            undo: Mutex::new(None),
            record: Mutex::new(None),
        });
        let host: Weak<dyn ViewHost> = Arc::downgrade(&adapter) as Weak<dyn ViewHost>;
        adapter.view.set_host(Some(host));
        adapter
    }

    pub fn view(&self) -> &Arc<CoreView> {
        &self.view
    }

    /// Start a render scheduler for `surface`. The first surface is the main
    /// one: it alone reports the first regenerate and fits the view.
    pub fn attach_surface(&self, name: &str, surface: Box<dyn Surface>) -> RenderResult<()> {
        let mut schedulers = self.schedulers.write();
        let mut options = SchedulerOptions::from_config(self.view.config());
        if !schedulers.is_empty() {
            options.notify_first_regen = false;
            options.fit_on_first_regen = false;
        }
        let scheduler = RenderScheduler::start(name, Arc::downgrade(&self.view), surface, options)?;
        scheduler.request_regen(false);
        schedulers.push(scheduler);
        Ok(())
    }

    pub fn surface_count(&self) -> usize {
        self.schedulers.read().len()
    }

    pub fn stats(&self, name: &str) -> Option<RenderStats> {
        self.schedulers
            .read()
            .iter()
            .find(|s| s.name() == name)
            .map(RenderScheduler::stats)
    }

    /// Wait for every surface to finish its pending work.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.schedulers
            .read()
            .iter()
            .all(|s| s.wait_idle(deadline.saturating_duration_since(Instant::now())))
    }

    fn start_engine(&self, kind: RecordKind, callback: Option<RecordCallback>) -> Option<RecordEngine> {
        let target: Arc<dyn RecordTarget> = self.view.clone();
        let capacity = self.view.config().record_queue_capacity;
        match RecordEngine::start(kind, Arc::downgrade(&target), capacity, callback) {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!("{kind} engine not started: {e}");
                None
            }
        }
    }

    /// Keep undo history in `storage`, with a background writer.
    pub fn start_undo(&self, storage: Arc<dyn Storage>) -> bool {
        if !self.view.start_undo_log(storage) {
            return false;
        }
        self.last_recorded.store(self.view.change_count(), Ordering::SeqCst);
        let engine = self.start_engine(RecordKind::Undo, None);
        let started = engine.is_some();
        *self.undo.lock() = engine;
        started
    }

    /// Record the session into `storage`. Every persisted frame is announced
    /// with [`Notification::ShapesRecorded`].
    pub fn start_record(&self, storage: Arc<dyn Storage>) -> bool {
        if !self.view.start_record_log(storage) {
            return false;
        }
        let view = Arc::downgrade(&self.view);
        let callback: RecordCallback = Box::new(move |frame| {
            if let Some(view) = view.upgrade() {
                view.notifier().emit(&Notification::ShapesRecorded(frame.clone()));
            }
        });
        match self.start_engine(RecordKind::Record, Some(callback)) {
            Some(engine) => {
                *self.record.lock() = Some(engine);
                true
            }
            None => {
                self.view.stop_record_log();
                false
            }
        }
    }

    pub fn stop_record(&self) -> bool {
        let engine = self.record.lock().take();
        if let Some(engine) = engine {
            engine.stop(self.stop_timeout());
        }
        self.view.stop_record_log()
    }

    fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.view.config().stop_timeout_ms)
    }

    /// Queue the front document for history once per change.
    fn record_commit(&self) {
        let doc = self.view.acquire_front_doc();
        let count = doc.change_count();
        if self.last_recorded.fetch_max(count, Ordering::SeqCst) >= count {
            return;
        }
        if let Some(engine) = self.undo.lock().as_ref() {
            engine.request_record(RecordFrame::new(0, Some(doc.clone()), None));
        }
        if let Some(tick) = self.view.record_tick() {
            if let Some(engine) = self.record.lock().as_ref() {
                let shapes = self.view.acquire_dynamic_shapes();
                engine.request_record(RecordFrame::new(tick, Some(doc), Some(shapes)));
            }
        }
    }

    /// Stop the view and every worker. Returns false if a worker outlived
    /// its stop timeout.
    pub fn stop(&self) -> bool {
        self.view.stop_drawing();
        let timeout = self.stop_timeout();
        let schedulers = std::mem::take(&mut *self.schedulers.write());
        let engines = [self.undo.lock().take(), self.record.lock().take()];

        let mut clean = true;
        for scheduler in &schedulers {
            clean &= scheduler.stop(timeout);
        }
        for engine in engines.iter().flatten() {
            clean &= engine.stop(timeout);
        }
        self.view.set_host(None);
        info!("view {} stopped", self.view.id());
        clean
    }
}

impl ViewHost for ViewAdapter {
    fn regen_all(&self, changed: bool) {
        for scheduler in self.schedulers.read().iter() {
            scheduler.request_regen(changed);
        }
        if changed {
            self.record_commit();
        }
    }

    fn regen_append(&self, id: ShapeId) {
        for scheduler in self.schedulers.read().iter() {
            scheduler.request_append(id);
        }
        self.record_commit();
    }

    fn history_restored(&self) {
        for scheduler in self.schedulers.read().iter() {
            scheduler.request_regen(false);
        }
        // The undo log already holds this state.
        let doc = self.view.acquire_front_doc();
        self.last_recorded.fetch_max(doc.change_count(), Ordering::SeqCst);
        if let Some(tick) = self.view.record_tick() {
            if let Some(engine) = self.record.lock().as_ref() {
                let shapes = self.view.acquire_dynamic_shapes();
                engine.request_record(RecordFrame::new(tick, Some(doc), Some(shapes)));
            }
        }
    }

    fn redraw(&self) {
        for scheduler in self.schedulers.read().iter() {
            scheduler.request_dynamic();
        }
        if let Some(tick) = self.view.record_tick() {
            if let Some(engine) = self.record.lock().as_ref() {
                let shapes = self.view.acquire_dynamic_shapes();
                engine.request_record(RecordFrame::new(tick, None, Some(shapes)));
            }
        }
    }

    fn request_undo(&self) -> bool {
        self.undo.lock().as_ref().is_some_and(RecordEngine::request_undo)
    }

    fn request_redo(&self) -> bool {
        self.undo.lock().as_ref().is_some_and(RecordEngine::request_redo)
    }
}
