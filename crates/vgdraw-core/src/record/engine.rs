//! Background worker draining record requests.

use super::{RecordFrame, RecordKind, RecordedFrame, REDO_TICK, UNDO_TICK};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The kernel side of recording: persists frames and replays history.
pub trait RecordTarget: Send + Sync {
    /// Persist a frame into the log of `kind`.
    fn record_frame(&self, kind: RecordKind, frame: &RecordFrame) -> Option<RecordedFrame>;
    fn undo(&self) -> bool;
    fn redo(&self) -> bool;
}

/// Called on the worker thread for every frame that reached the log.
pub type RecordCallback = Box<dyn Fn(&RecordedFrame) + Send + Sync>;

#[derive(Default)]
struct Queue {
    frames: VecDeque<RecordFrame>,
    stopping: bool,
    finished: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
    done: Condvar,
    capacity: usize,
}

/// One worker thread with a fixed-capacity request queue.
///
/// Requests never block: when the queue is full the incoming frame is
/// dropped, releasing its snapshots.
pub struct RecordEngine {
    kind: RecordKind,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RecordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEngine")
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .finish()
    }
}

impl RecordEngine {
    /// Spawn the worker. It exits on its own once `target` is gone.
    pub fn start(
        kind: RecordKind,
        target: Weak<dyn RecordTarget>,
        capacity: usize,
        callback: Option<RecordCallback>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
            done: Condvar::new(),
            capacity: capacity.max(1),
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("vgdraw-{kind}"))
            .spawn(move || run(kind, &worker, target, callback))?;
        info!("{kind} engine started, capacity {}", shared.capacity);
        Ok(Self {
            kind,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().frames.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.queue.lock().stopping
    }

    fn push(&self, frame: RecordFrame) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.stopping {
            return false;
        }
        if queue.frames.len() >= self.shared.capacity {
            drop(queue);
            warn!("{} queue full, frame {} dropped", self.kind, frame.tick);
            return false;
        }
        queue.frames.push_back(frame);
        self.shared.wake.notify_one();
        true
    }

    /// Queue a state for persistence. Returns false if it was dropped.
    pub fn request_record(&self, frame: RecordFrame) -> bool {
        if frame.is_history_request() {
            warn!("reserved tick {:#x} rejected", frame.tick);
            return false;
        }
        self.push(frame)
    }

    pub fn request_undo(&self) -> bool {
        self.push(RecordFrame::undo())
    }

    pub fn request_redo(&self) -> bool {
        self.push(RecordFrame::redo())
    }

    /// Drop pending frames, wake the worker and wait up to `timeout` for it.
    /// Returns false if the worker did not finish in time.
    pub fn stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.queue.lock();
        queue.stopping = true;
        queue.frames.clear();
        self.shared.wake.notify_all();
        while !queue.finished {
            if self.shared.done.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }
        let finished = queue.finished;
        drop(queue);

        let handle = self.handle.lock().take();
        if finished {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("{} worker panicked", self.kind);
                }
            }
        } else if handle.is_some() {
            warn!("{} worker did not stop within {timeout:?}", self.kind);
        }
        finished
    }
}

impl Drop for RecordEngine {
    fn drop(&mut self) {
        if self.handle.lock().is_some() {
            self.stop(Duration::from_millis(1000));
        }
    }
}

/// Next frame to persist, or `None` once stopping.
fn next_frame(shared: &Shared) -> Option<RecordFrame> {
    let mut queue = shared.queue.lock();
    loop {
        if queue.stopping {
            return None;
        }
        match queue.frames.pop_front() {
            Some(frame) if frame.is_dynamic_only() && !queue.frames.is_empty() => {
                debug!("overlay frame {} superseded", frame.tick);
            }
            Some(frame) => return Some(frame),
            None => shared.wake.wait(&mut queue),
        }
    }
}

fn run(
    kind: RecordKind,
    shared: &Shared,
    target: Weak<dyn RecordTarget>,
    callback: Option<RecordCallback>,
) {
    while let Some(frame) = next_frame(shared) {
        let Some(target) = target.upgrade() else {
            debug!("{kind} target gone, worker exiting");
            break;
        };
        match frame.tick {
            UNDO_TICK => {
                target.undo();
            }
            REDO_TICK => {
                target.redo();
            }
            _ => {
                if let Some(recorded) = target.record_frame(kind, &frame) {
                    if let Some(callback) = &callback {
                        callback(&recorded);
                    }
                }
            }
        }
    }
    let mut queue = shared.queue.lock();
    queue.frames.clear();
    queue.finished = true;
    shared.done.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ShapeDocument;
    use crate::dynamic::{DynamicData, DynamicShapeSet};
    use crate::record::FrameFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records ticks; blocks inside `record_frame` while the gate is closed.
    #[derive(Default)]
    struct GatedTarget {
        gate: Mutex<bool>,
        opened: Condvar,
        ticks: Mutex<Vec<u32>>,
        undos: AtomicUsize,
        redos: AtomicUsize,
    }

    impl GatedTarget {
        fn closed() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn open() -> Arc<Self> {
            let gated = Self::closed();
            gated.release();
            gated
        }

        fn release(&self) {
            *self.gate.lock() = true;
            self.opened.notify_all();
        }

        fn wait_for_ticks(&self, count: usize) -> Vec<u32> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                let ticks = self.ticks.lock().clone();
                if ticks.len() >= count {
                    return ticks;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            self.ticks.lock().clone()
        }
    }

    impl RecordTarget for GatedTarget {
        fn record_frame(&self, _kind: RecordKind, frame: &RecordFrame) -> Option<RecordedFrame> {
            let mut open = self.gate.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            drop(open);
            let mut ticks = self.ticks.lock();
            ticks.push(frame.tick);
            Some(RecordedFrame {
                filename: format!("{}.vg", ticks.len() - 1),
                tick: frame.tick,
                index: ticks.len() - 1,
                flags: FrameFlags::EDIT,
            })
        }

        fn undo(&self) -> bool {
            self.undos.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn redo(&self) -> bool {
            self.redos.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn engine(gated: &Arc<GatedTarget>, capacity: usize, callback: Option<RecordCallback>) -> RecordEngine {
        let target: Arc<dyn RecordTarget> = gated.clone();
        RecordEngine::start(RecordKind::Record, Arc::downgrade(&target), capacity, callback).unwrap()
    }

    #[test]
    fn test_frames_in_order_with_callback() {
        let gated = GatedTarget::open();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let engine = engine(
            &gated,
            20,
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let doc = ShapeDocument::new();
        for tick in 1..=5 {
            assert!(engine.request_record(RecordFrame::new(tick, Some(doc.clone()), None)));
        }
        assert_eq!(gated.wait_for_ticks(5), vec![1, 2, 3, 4, 5]);
        assert!(engine.stop(Duration::from_secs(1)));
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(doc.ref_count(), 1);
    }

    #[test]
    fn test_full_queue_drops_incoming_frame() {
        let gated = GatedTarget::closed();
        let engine = engine(&gated, 3, None);
        let doc = ShapeDocument::new();

        // The worker takes the first frame and blocks on the gate.
        assert!(engine.request_record(RecordFrame::new(1, Some(doc.clone()), None)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        for tick in 2..=4 {
            assert!(engine.request_record(RecordFrame::new(tick, Some(doc.clone()), None)));
        }

        let extra = ShapeDocument::new();
        let overlay = DynamicShapeSet::new(DynamicData::default());
        let started = Instant::now();
        assert!(!engine.request_record(RecordFrame::new(5, Some(extra.clone()), Some(overlay.clone()))));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(extra.ref_count(), 1);
        assert_eq!(overlay.ref_count(), 1);

        gated.release();
        assert_eq!(gated.wait_for_ticks(4), vec![1, 2, 3, 4]);
        assert!(engine.stop(Duration::from_secs(1)));
        assert_eq!(doc.ref_count(), 1);
    }

    #[test]
    fn test_overlay_frame_superseded_by_next() {
        let gated = GatedTarget::closed();
        let engine = engine(&gated, 20, None);
        let doc = ShapeDocument::new();
        assert!(engine.request_record(RecordFrame::new(1, Some(doc.clone()), None)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }

        let overlay = DynamicShapeSet::new(DynamicData::default());
        assert!(engine.request_record(RecordFrame::new(2, None, Some(overlay.clone()))));
        assert!(engine.request_record(RecordFrame::new(3, Some(doc.clone()), None)));
        assert!(engine.request_record(RecordFrame::new(4, None, Some(overlay.clone()))));

        gated.release();
        assert_eq!(gated.wait_for_ticks(3), vec![1, 3, 4]);
        assert!(engine.stop(Duration::from_secs(1)));
        assert_eq!(overlay.ref_count(), 1);
    }

    #[test]
    fn test_history_sentinels_and_reserved_ticks() {
        let gated = GatedTarget::open();
        let engine = engine(&gated, 20, None);
        assert!(!engine.request_record(RecordFrame::new(UNDO_TICK, None, None)));
        assert!(engine.request_undo());
        assert!(engine.request_redo());
        assert!(engine.request_undo());
        let deadline = Instant::now() + Duration::from_secs(5);
        while gated.undos.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(engine.stop(Duration::from_secs(1)));
        assert_eq!(gated.undos.load(Ordering::SeqCst), 2);
        assert_eq!(gated.redos.load(Ordering::SeqCst), 1);
        assert!(gated.ticks.lock().is_empty());
    }

    #[test]
    fn test_worker_exits_when_target_dropped() {
        let gated = GatedTarget::open();
        let engine = engine(&gated, 20, None);
        drop(gated);
        assert!(engine.request_record(RecordFrame::new(1, Some(ShapeDocument::new()), None)));
        assert!(engine.stop(Duration::from_secs(1)));
        assert!(!engine.request_record(RecordFrame::new(2, None, None)));
    }

    #[test]
    fn test_stop_times_out_on_busy_worker() {
        let gated = GatedTarget::closed();
        let engine = engine(&gated, 20, None);
        assert!(engine.request_record(RecordFrame::new(1, Some(ShapeDocument::new()), None)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        let started = Instant::now();
        assert!(!engine.stop(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
        gated.release();
    }
}
