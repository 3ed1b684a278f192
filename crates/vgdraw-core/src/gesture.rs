//! Pointer samples to gesture transitions.
//!
//! [`GestureDispatcher`] is a pure state machine over touch events. It knows
//! nothing about shapes; it reports pan/tap/press/two-finger gestures to a
//! [`GestureSink`] (normally the kernel view) as ordered state transitions.

use crate::config::GestureConfig;
use kurbo::Point;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Pan,
    Tap,
    DblTap,
    Press,
    /// Two-finger pan/zoom.
    TwoFinger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureState {
    Possible,
    Began,
    Moved,
    Ended,
    Cancel,
}

/// Movement state of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Stopped,
    /// Down observed, no scroll detected yet.
    Started,
    ReadyToMove,
    Moving,
    EndingMove,
    PressMoving,
}

/// Receiver of dispatched gestures. Returning false rejects the transition.
pub trait GestureSink {
    fn on_gesture(
        &self,
        kind: GestureKind,
        state: GestureState,
        point: Point,
        switch_gesture: bool,
    ) -> bool;

    fn two_fingers_move(
        &self,
        state: GestureState,
        p1: Point,
        p2: Point,
        switch_gesture: bool,
    ) -> bool;

    /// Called when gestures are disabled, after any drag was cancelled.
    fn gestures_disabled(&self) {}
}

#[derive(Debug)]
pub struct GestureDispatcher {
    config: GestureConfig,
    state: MoveState,
    finger_count: usize,
    /// Samples held back until a scroll starts; the first is the down point.
    pending: Vec<Point>,
    last: Point,
    last2: Point,
    down: Point,
    down_time: u64,
    touch_time: u64,
    enabled: bool,
}

impl GestureDispatcher {
    pub fn new(config: GestureConfig) -> Self {
        let capacity = (config.pending_coords / 2).max(1);
        Self {
            config,
            state: MoveState::Stopped,
            finger_count: 0,
            pending: Vec::with_capacity(capacity),
            last: Point::ZERO,
            last2: Point::ZERO,
            down: Point::ZERO,
            down_time: 0,
            touch_time: 0,
            enabled: true,
        }
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn finger_count(&self) -> usize {
        self.finger_count
    }

    pub fn pending(&self) -> &[Point] {
        &self.pending
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn pending_capacity(&self) -> usize {
        (self.config.pending_coords / 2).max(1)
    }

    fn report(
        &self,
        sink: &dyn GestureSink,
        state: GestureState,
        fingers: usize,
        p1: Point,
        p2: Point,
        switch_gesture: bool,
    ) -> bool {
        if fingers > 1 {
            sink.two_fingers_move(state, p1, p2, switch_gesture)
        } else {
            sink.on_gesture(GestureKind::Pan, state, p1, switch_gesture)
        }
    }

    /// Replay buffered samples as Possible, Began and Moved from the true start.
    fn apply_pending(&mut self, sink: &dyn GestureSink) -> bool {
        let Some(&start) = self.pending.first() else {
            return false;
        };
        self.finger_count = self.finger_count.max(1);
        let fingers = self.finger_count;
        let ok = self.report(sink, GestureState::Possible, fingers, start, start, false)
            && self.report(sink, GestureState::Began, fingers, start, start, false);
        if ok {
            for p in &self.pending[1..] {
                self.report(sink, GestureState::Moved, fingers, *p, *p, false);
            }
        }
        ok
    }

    pub fn touch_down(&mut self, time_ms: u64, fingers: usize, p: Point) {
        self.state = MoveState::Started;
        self.pending.clear();
        if fingers == 1 {
            self.last = p;
            self.pending.push(p);
        }
        self.last2 = self.last;
        self.down = p;
        self.down_time = time_ms;
        self.touch_time = time_ms;
    }

    /// Begin a one-finger drag directly, as for drag and drop.
    pub fn drag_start(&mut self, time_ms: u64, p: Point) {
        self.state = MoveState::ReadyToMove;
        self.pending.clear();
        self.pending.push(p);
        self.last = p;
        self.last2 = p;
        self.down = p;
        self.down_time = time_ms;
        self.touch_time = time_ms;
    }

    /// Feed a move sample. `p2` equals `p1` for one finger.
    pub fn touch_moved(
        &mut self,
        sink: &dyn GestureSink,
        time_ms: u64,
        fingers: usize,
        p1: Point,
        p2: Point,
    ) -> bool {
        self.touch_time = time_ms;
        if !self.enabled {
            return false;
        }
        let handled = self.moved(sink, fingers, p1, p2);
        if self.state == MoveState::Started
            && fingers == 1
            && p1.distance(self.down) > self.config.touch_slop
        {
            self.state = MoveState::ReadyToMove;
        }
        handled
    }

    fn is_noise(&self, a: Point, b: Point) -> bool {
        let t = self.config.noise_threshold;
        (a.x - b.x).abs() < t && (a.y - b.y).abs() < t
    }

    fn moved(&mut self, sink: &dyn GestureSink, fingers: usize, p1: Point, p2: Point) -> bool {
        if fingers == 1 && self.is_noise(self.last, p1) {
            return false;
        }
        if fingers == 2 && self.is_noise(self.last, p1) && self.is_noise(self.last2, p2) {
            return false;
        }

        if self.state == MoveState::ReadyToMove
            || (self.state == MoveState::Started && fingers == 2)
        {
            self.finger_count = fingers;
            self.last = p1;
            self.last2 = p2;
            self.state = if self.state == MoveState::Started {
                MoveState::ReadyToMove
            } else if fingers == 1 && !self.pending.is_empty() {
                if self.apply_pending(sink) {
                    MoveState::Moving
                } else {
                    MoveState::EndingMove
                }
            } else if self.report(sink, GestureState::Possible, fingers, p1, p2, false)
                && self.report(sink, GestureState::Began, fingers, p1, p2, false)
            {
                MoveState::Moving
            } else {
                MoveState::EndingMove
            };
            self.pending.clear();
        } else if self.state == MoveState::Started
            && fingers == 1
            && !self.pending.is_empty()
            && self.pending.len() < self.pending_capacity()
        {
            self.pending.push(p1);
        } else if self.state == MoveState::PressMoving {
            sink.on_gesture(GestureKind::Press, GestureState::Moved, p1, false);
        }

        if self.state != MoveState::Moving {
            return false;
        }

        if self.finger_count == fingers {
            let handled = self.report(sink, GestureState::Moved, fingers, p1, p2, false);
            self.last = p1;
            return handled;
        }

        if self.finger_count == 1 {
            // One finger became two. A quick second finger cancels the pan
            // instead of ending it. Pinned behaviour, see the tests.
            let quick = self.touch_time.saturating_sub(self.down_time) < self.config.quick_two_finger_ms;
            let end = if quick {
                GestureState::Cancel
            } else {
                GestureState::Ended
            };
            debug!("finger count 1 -> {fingers}, {end:?} pan");
            let mut handled = self.report(sink, end, 1, self.last, self.last, true);
            if self.report(sink, GestureState::Possible, fingers, p1, p2, true) {
                self.finger_count = fingers;
                handled = self.report(sink, GestureState::Began, fingers, p1, p2, true);
            } else {
                self.state = MoveState::EndingMove;
            }
            handled
        } else {
            // Two fingers never continue as a one-finger pan.
            debug!("finger count {} -> {fingers}, ending", self.finger_count);
            self.state = MoveState::EndingMove;
            self.report(sink, GestureState::Ended, self.finger_count, p1, p2, true)
        }
    }

    /// Finish the touch. `submit` is false for a system cancel.
    pub fn touch_ended(
        &mut self,
        sink: &dyn GestureSink,
        time_ms: u64,
        submit: bool,
        p1: Point,
        p2: Point,
    ) -> bool {
        self.touch_time = time_ms;
        if submit && self.pending.len() > 1 && self.apply_pending(sink) {
            self.state = MoveState::Moving;
            self.pending.clear();
        }
        let end = if submit {
            GestureState::Ended
        } else {
            GestureState::Cancel
        };
        let handled = match self.state {
            MoveState::Moving => self.report(sink, end, self.finger_count, p1, p2, false),
            MoveState::PressMoving => sink.on_gesture(GestureKind::Press, end, p1, false),
            _ => false,
        };
        self.state = MoveState::Stopped;
        self.finger_count = 0;
        handled
    }

    /// Platform long press at `p`.
    pub fn long_press(&mut self, sink: &dyn GestureSink, p: Point) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.pending.is_empty()
            && sink.on_gesture(GestureKind::Press, GestureState::Began, p, false)
        {
            self.pending.clear();
            self.state = MoveState::PressMoving;
            true
        } else {
            if self.state == MoveState::Started {
                self.state = MoveState::ReadyToMove;
            }
            false
        }
    }

    /// Detect a long press from elapsed time when the host has no recognizer.
    pub fn poll_long_press(&mut self, sink: &dyn GestureSink, now_ms: u64) -> bool {
        if self.state == MoveState::Started
            && now_ms.saturating_sub(self.down_time) >= self.config.long_press_ms
        {
            let at = self.down;
            return self.long_press(sink, at);
        }
        false
    }

    /// A single tap the platform confirmed is not the start of a double tap.
    pub fn single_tap_confirmed(&mut self, sink: &dyn GestureSink) -> bool {
        match self.pending.first() {
            Some(&p) if self.enabled => self.tap(sink, p),
            _ => false,
        }
    }

    /// Report a tap directly.
    pub fn tap(&mut self, sink: &dyn GestureSink, p: Point) -> bool {
        self.state = MoveState::Stopped;
        sink.on_gesture(GestureKind::Tap, GestureState::Possible, p, false)
            && sink.on_gesture(GestureKind::Tap, GestureState::Ended, p, false)
    }

    pub fn double_tap(&mut self, sink: &dyn GestureSink, p: Point) -> bool {
        let handled = match self.pending.first() {
            Some(&start) if self.enabled => {
                sink.on_gesture(GestureKind::DblTap, GestureState::Possible, start, false)
                    && sink.on_gesture(GestureKind::DblTap, GestureState::Ended, p, false)
            }
            _ => false,
        };
        self.pending.clear();
        handled
    }

    pub fn cancel_dragging(&mut self, sink: &dyn GestureSink) {
        match self.state {
            MoveState::Moving => {
                self.state = MoveState::Stopped;
                let fingers = self.finger_count;
                self.report(sink, GestureState::Cancel, fingers, self.last, self.last2, false);
            }
            MoveState::PressMoving => {
                self.state = MoveState::Stopped;
                sink.on_gesture(GestureKind::Press, GestureState::Cancel, Point::ZERO, false);
            }
            _ => {}
        }
    }

    pub fn set_gesture_enabled(&mut self, sink: &dyn GestureSink, enabled: bool) {
        if !enabled {
            self.cancel_dragging(sink);
            sink.gestures_disabled();
        }
        self.enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        One(GestureKind, GestureState, Point, bool),
        Two(GestureState, Point, Point, bool),
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<Event>>,
        reject_two: bool,
        disabled: RefCell<bool>,
    }

    impl GestureSink for Recorder {
        fn on_gesture(&self, kind: GestureKind, state: GestureState, p: Point, s: bool) -> bool {
            self.events.borrow_mut().push(Event::One(kind, state, p, s));
            true
        }

        fn two_fingers_move(&self, state: GestureState, p1: Point, p2: Point, s: bool) -> bool {
            self.events.borrow_mut().push(Event::Two(state, p1, p2, s));
            !self.reject_two
        }

        fn gestures_disabled(&self) {
            *self.disabled.borrow_mut() = true;
        }
    }

    fn pan(state: GestureState, x: f64, y: f64) -> Event {
        Event::One(GestureKind::Pan, state, Point::new(x, y), false)
    }

    fn dispatcher() -> GestureDispatcher {
        GestureDispatcher::new(GestureConfig::default())
    }

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_buffered_samples_replayed_from_down_point() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(10.0, 10.0));
        assert!(!g.touch_moved(&sink, 16, 1, pt(50.0, 50.0), pt(50.0, 50.0)));
        assert_eq!(g.state(), MoveState::ReadyToMove);
        assert!(sink.events.borrow().is_empty());

        assert!(g.touch_ended(&sink, 32, true, pt(50.0, 50.0), pt(50.0, 50.0)));
        assert_eq!(
            *sink.events.borrow(),
            vec![
                pan(GestureState::Possible, 10.0, 10.0),
                pan(GestureState::Began, 10.0, 10.0),
                pan(GestureState::Moved, 50.0, 50.0),
                pan(GestureState::Ended, 50.0, 50.0),
            ]
        );
        assert_eq!(g.state(), MoveState::Stopped);
    }

    #[test]
    fn test_moving_after_slop() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(0.0, 0.0));
        g.touch_moved(&sink, 10, 1, pt(20.0, 0.0), pt(20.0, 0.0));
        assert!(g.touch_moved(&sink, 20, 1, pt(30.0, 0.0), pt(30.0, 0.0)));
        assert_eq!(g.state(), MoveState::Moving);
        assert_eq!(
            *sink.events.borrow(),
            vec![
                pan(GestureState::Possible, 0.0, 0.0),
                pan(GestureState::Began, 0.0, 0.0),
                pan(GestureState::Moved, 20.0, 0.0),
                pan(GestureState::Moved, 30.0, 0.0),
            ]
        );
    }

    #[test]
    fn test_sub_pixel_moves_are_noise() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(10.0, 10.0));
        g.touch_moved(&sink, 5, 1, pt(10.5, 10.9), pt(10.5, 10.9));
        assert_eq!(g.pending().len(), 1);
        g.touch_moved(&sink, 6, 1, pt(12.0, 10.0), pt(12.0, 10.0));
        assert_eq!(g.pending().len(), 2);
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(0.0, 0.0));
        for i in 1..30 {
            // Stay inside the touch slop by zig-zagging.
            let x = if i % 2 == 0 { 0.0 } else { 3.0 };
            g.touch_moved(&sink, i, 1, pt(x, 0.0), pt(x, 0.0));
        }
        assert_eq!(g.state(), MoveState::Started);
        assert_eq!(g.pending().len(), 10);
    }

    #[test]
    fn test_cancel_never_reports_ended() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(0.0, 0.0));
        g.touch_moved(&sink, 10, 1, pt(20.0, 0.0), pt(20.0, 0.0));
        g.touch_moved(&sink, 20, 1, pt(30.0, 0.0), pt(30.0, 0.0));
        g.touch_ended(&sink, 30, false, pt(30.0, 0.0), pt(30.0, 0.0));
        let events = sink.events.borrow();
        assert_eq!(events.last(), Some(&pan(GestureState::Cancel, 30.0, 0.0)));
        assert!(!events.contains(&pan(GestureState::Ended, 30.0, 0.0)));
    }

    #[test]
    fn test_cancel_before_scroll_sends_nothing() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(0.0, 0.0));
        g.touch_moved(&sink, 10, 1, pt(3.0, 0.0), pt(3.0, 0.0));
        assert!(!g.touch_ended(&sink, 20, false, pt(3.0, 0.0), pt(3.0, 0.0)));
        assert!(sink.events.borrow().is_empty());
    }

    // Pinned behaviour: a second finger within the quick window cancels the
    // one-finger pan rather than ending it.
    #[test]
    fn test_quick_second_finger_cancels_pan() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(10.0, 10.0));
        g.touch_moved(&sink, 100, 1, pt(30.0, 30.0), pt(30.0, 30.0));
        g.touch_moved(&sink, 200, 1, pt(40.0, 40.0), pt(40.0, 40.0));
        sink.events.borrow_mut().clear();

        g.touch_moved(&sink, 300, 2, pt(45.0, 45.0), pt(100.0, 100.0));
        assert_eq!(
            *sink.events.borrow(),
            vec![
                Event::One(GestureKind::Pan, GestureState::Cancel, pt(40.0, 40.0), true),
                Event::Two(GestureState::Possible, pt(45.0, 45.0), pt(100.0, 100.0), true),
                Event::Two(GestureState::Began, pt(45.0, 45.0), pt(100.0, 100.0), true),
            ]
        );
        assert_eq!(g.finger_count(), 2);
        assert_eq!(g.state(), MoveState::Moving);
    }

    // Pinned behaviour: after the quick window the one-finger pan ends.
    #[test]
    fn test_late_second_finger_ends_pan() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(10.0, 10.0));
        g.touch_moved(&sink, 100, 1, pt(30.0, 30.0), pt(30.0, 30.0));
        g.touch_moved(&sink, 500, 1, pt(40.0, 40.0), pt(40.0, 40.0));
        sink.events.borrow_mut().clear();

        g.touch_moved(&sink, 900, 2, pt(45.0, 45.0), pt(100.0, 100.0));
        assert_eq!(
            sink.events.borrow()[0],
            Event::One(GestureKind::Pan, GestureState::Ended, pt(40.0, 40.0), true)
        );
    }

    #[test]
    fn test_rejected_two_finger_ends_move() {
        let sink = Recorder {
            reject_two: true,
            ..Default::default()
        };
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(10.0, 10.0));
        g.touch_moved(&sink, 100, 1, pt(30.0, 30.0), pt(30.0, 30.0));
        g.touch_moved(&sink, 200, 1, pt(40.0, 40.0), pt(40.0, 40.0));
        g.touch_moved(&sink, 300, 2, pt(45.0, 45.0), pt(100.0, 100.0));
        assert_eq!(g.state(), MoveState::EndingMove);
        assert_eq!(g.finger_count(), 1);
    }

    // Pinned behaviour: two fingers dropping to one end the gesture.
    #[test]
    fn test_two_to_one_ends_gesture() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 2, pt(10.0, 10.0));
        g.touch_moved(&sink, 10, 2, pt(20.0, 20.0), pt(80.0, 80.0));
        assert_eq!(g.state(), MoveState::ReadyToMove);
        g.touch_moved(&sink, 20, 2, pt(25.0, 25.0), pt(90.0, 90.0));
        assert_eq!(g.state(), MoveState::Moving);
        sink.events.borrow_mut().clear();

        g.touch_moved(&sink, 30, 1, pt(30.0, 30.0), pt(30.0, 30.0));
        assert_eq!(g.state(), MoveState::EndingMove);
        assert_eq!(
            *sink.events.borrow(),
            vec![Event::Two(GestureState::Ended, pt(30.0, 30.0), pt(30.0, 30.0), true)]
        );

        sink.events.borrow_mut().clear();
        g.touch_moved(&sink, 40, 1, pt(40.0, 40.0), pt(40.0, 40.0));
        assert!(sink.events.borrow().is_empty());
    }

    #[test]
    fn test_tap_requires_down() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        assert!(!g.single_tap_confirmed(&sink));
        assert!(sink.events.borrow().is_empty());

        g.touch_down(0, 1, pt(5.0, 6.0));
        g.touch_ended(&sink, 50, true, pt(5.0, 6.0), pt(5.0, 6.0));
        assert!(g.single_tap_confirmed(&sink));
        assert_eq!(
            *sink.events.borrow(),
            vec![
                Event::One(GestureKind::Tap, GestureState::Possible, pt(5.0, 6.0), false),
                Event::One(GestureKind::Tap, GestureState::Ended, pt(5.0, 6.0), false),
            ]
        );
    }

    #[test]
    fn test_double_tap_consumes_buffer() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(5.0, 5.0));
        assert!(g.double_tap(&sink, pt(6.0, 6.0)));
        assert!(!g.double_tap(&sink, pt(6.0, 6.0)));
        assert_eq!(sink.events.borrow().len(), 2);
    }

    #[test]
    fn test_long_press_then_press_moves() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(5.0, 5.0));
        assert!(!g.poll_long_press(&sink, 100));
        assert!(g.poll_long_press(&sink, 600));
        assert_eq!(g.state(), MoveState::PressMoving);

        g.touch_moved(&sink, 700, 1, pt(20.0, 5.0), pt(20.0, 5.0));
        g.touch_ended(&sink, 800, true, pt(20.0, 5.0), pt(20.0, 5.0));
        let events = sink.events.borrow();
        assert_eq!(events[0], Event::One(GestureKind::Press, GestureState::Began, pt(5.0, 5.0), false));
        assert_eq!(events[1], Event::One(GestureKind::Press, GestureState::Moved, pt(20.0, 5.0), false));
        assert_eq!(events[2], Event::One(GestureKind::Press, GestureState::Ended, pt(20.0, 5.0), false));
        assert!(!events.iter().any(|e| matches!(e, Event::One(GestureKind::Pan, ..))));
    }

    #[test]
    fn test_disable_cancels_drag() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.touch_down(0, 1, pt(0.0, 0.0));
        g.touch_moved(&sink, 10, 1, pt(20.0, 0.0), pt(20.0, 0.0));
        g.touch_moved(&sink, 20, 1, pt(30.0, 0.0), pt(30.0, 0.0));
        g.set_gesture_enabled(&sink, false);
        assert_eq!(g.state(), MoveState::Stopped);
        assert!(*sink.disabled.borrow());
        assert!(matches!(
            sink.events.borrow().last(),
            Some(Event::One(GestureKind::Pan, GestureState::Cancel, _, _))
        ));
        assert!(!g.touch_moved(&sink, 30, 1, pt(40.0, 0.0), pt(40.0, 0.0)));
    }

    #[test]
    fn test_drag_start_moves_immediately() {
        let sink = Recorder::default();
        let mut g = dispatcher();
        g.drag_start(0, pt(0.0, 0.0));
        assert!(g.touch_moved(&sink, 10, 1, pt(3.0, 0.0), pt(3.0, 0.0)));
        assert_eq!(g.state(), MoveState::Moving);
    }
}
