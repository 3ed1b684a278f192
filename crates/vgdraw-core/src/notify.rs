//! Observer notifications.
//!
//! Observers subscribe either with a callback or by taking a channel
//! receiver. Subscriptions are removable, and channel subscribers whose
//! receiver is dropped are pruned on the next emit.

use crate::record::RecordedFrame;
use crate::shapes::ShapeId;
use crossbeam::channel::{Receiver, Sender, unbounded};
use log::trace;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Events fired to external observers. Fired on commit, not per gesture sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    CommandChanged(String),
    SelectionChanged(Vec<ShapeId>),
    /// A committed edit; carries the new change count.
    ContentChanged(u64),
    DynamicChanged,
    /// The first full regenerate of a view finished.
    FirstRegen,
    ShapeDeleted(ShapeId),
    ShapeClicked { id: ShapeId, tag: i32 },
    ShapesRecorded(RecordedFrame),
    ZoomChanged(f64),
}

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(Sender<Notification>),
}

/// Handle returned by [`Notifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Default)]
pub struct Notifier {
    next: AtomicU64,
    sinks: RwLock<Vec<(u64, Sink)>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, sink: Sink) -> Subscription {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.sinks.write().push((id, sink));
        Subscription(id)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.push(Sink::Callback(Arc::new(callback)))
    }

    /// Receive notifications on a channel.
    pub fn subscribe_channel(&self) -> (Subscription, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (self.push(Sink::Channel(tx)), rx)
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(id, _)| *id != subscription.0);
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every subscriber. Callbacks run without the list lock held,
    /// so they may subscribe or unsubscribe.
    pub fn emit(&self, notification: &Notification) {
        trace!("notify {notification:?}");
        let sinks: Vec<(u64, Sink)> = self.sinks.read().clone();
        let mut closed = Vec::new();
        for (id, sink) in sinks {
            match sink {
                Sink::Callback(cb) => cb(notification),
                Sink::Channel(tx) => {
                    if tx.send(notification.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.sinks.write().retain(|(id, _)| !closed.contains(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callback_and_unsubscribe() {
        let notifier = Notifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = notifier.subscribe(move |n| {
            if matches!(n, Notification::ContentChanged(_)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        notifier.emit(&Notification::ContentChanged(1));
        notifier.emit(&Notification::DynamicChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(notifier.unsubscribe(sub));
        assert!(!notifier.unsubscribe(sub));
        notifier.emit(&Notification::ContentChanged(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_pruned_when_receiver_dropped() {
        let notifier = Notifier::new();
        let (_, rx) = notifier.subscribe_channel();
        notifier.emit(&Notification::FirstRegen);
        assert_eq!(rx.try_recv(), Ok(Notification::FirstRegen));

        drop(rx);
        notifier.emit(&Notification::FirstRegen);
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let notifier = Arc::new(Notifier::new());
        let inner = Arc::clone(&notifier);
        let slot = Arc::new(parking_lot::Mutex::new(None::<Subscription>));
        let own = Arc::clone(&slot);
        let sub = notifier.subscribe(move |_| {
            if let Some(sub) = own.lock().take() {
                inner.unsubscribe(sub);
            }
        });
        *slot.lock() = Some(sub);
        notifier.emit(&Notification::DynamicChanged);
        assert!(notifier.is_empty());
    }
}
