//! Multi-subscriber notifications.
//!
//! A [`Signal`] holds a list of handlers behind a mutex.  [`Signal::emit`]
//! calls every handler synchronously **on the emitting thread**, which for
//! the controllers is either the caller's thread, a pipeline's bus dispatch
//! thread, or a playback notifier thread.  Handlers must not assume they
//! run on a UI or control thread.
//!
//! The handler list is snapshotted before calling out, so a handler may
//! connect or disconnect (itself included) without deadlocking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::graph::lock;

/// Identifies one connected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SubscriptionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Signal<T> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn connect<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        lock(&self.handlers).push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` when `id` was not connected to this signal.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut handlers = lock(&self.handlers);
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = lock(&self.handlers)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in snapshot {
            handler(value);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.handlers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn every_handler_sees_every_emit() {
        let signal = Signal::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let total = Arc::clone(&total);
            signal.connect(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }
        signal.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn disconnect_removes_only_that_handler() {
        let signal = Signal::<()>::new();
        let a = signal.connect(|_| {});
        let b = signal.connect(|_| {});
        assert_ne!(a, b);
        assert!(signal.disconnect(a));
        assert!(!signal.disconnect(a));
        assert_eq!(signal.len(), 1);
    }

    #[test]
    fn handler_may_disconnect_itself() {
        let signal = Arc::new(Signal::<()>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();
        let (weak, slot2) = (Arc::downgrade(&signal), Arc::clone(&slot));
        let id = signal.connect(move |_| {
            if let (Some(signal), Some(id)) = (weak.upgrade(), *lock(&slot2)) {
                signal.disconnect(id);
            }
        });
        *lock(&slot) = Some(id);
        signal.emit(&());
        assert!(signal.is_empty());
    }

    #[test]
    fn ids_are_unique_across_signals() {
        let a = Signal::<()>::new().connect(|_| {});
        let b = Signal::<()>::new().connect(|_| {});
        assert_ne!(a, b);
    }
}
