use std::sync::{Arc, Mutex, MutexGuard};

/// A handler registered against a [`Bus`]. Handlers run synchronously, on the thread
/// that calls [`Bus::emit`] — there is no queue and no backpressure, so a handler
/// that blocks will block the emitter.
type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// A plain typed-dispatch mechanism: one bus carries one event type, subscribers
/// register a closure, and `emit` invokes every registered closure in registration
/// order on the emitter's own thread.
///
/// This is adequate for this system because the only producer-rate concern is the
/// WebSocket broadcast, whose send is fire-and-forget; there is no need for a
/// channel-backed bus here the way `EventBus::register`/`subscribe` works in
/// channel-oriented designs.
///
/// `Bus` is cheap to clone — clones share the same subscriber list, the way
/// `slippi-authproxy-shared-types`'s `Flag`/`Queue` share their inner state — so a
/// single bus built at startup can be handed to every thread that needs to emit on it.
pub struct Bus<E> {
    subscribers: Arc<Mutex<Vec<Handler<E>>>>,
}

impl<E> Clone for Bus<E> {
    fn clone(&self) -> Self {
        Self { subscribers: Arc::clone(&self.subscribers) }
    }
}

impl<E> Bus<E> {
    /// Creates a new, empty bus.
    pub fn new() -> Self {
        Self { subscribers: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Locks the subscriber list, recovering from poisoning rather than panicking the
    /// caller: a subscriber handler that panics while holding this lock must not take
    /// down every other thread that emits onto or subscribes to the bus.
    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Handler<E>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            tracing::error!("event bus subscriber list lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Registers a handler. Handlers are never removed once registered; this system
    /// has a fixed set of long-lived subscribers (the pool, the WebSocket server) so
    /// there's no need for an unsubscribe path.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.lock_subscribers().push(Box::new(handler));
    }

    /// Dispatches `event` to every registered handler, synchronously, in the order
    /// they were registered.
    pub fn emit(&self, event: E) {
        let subscribers = self.lock_subscribers();

        for handler in subscribers.iter() {
            handler(&event);
        }
    }

    /// Returns the number of currently registered handlers. Mostly useful for tests.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }
}

impl<E> Default for Bus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn emit_delivers_to_all_subscribers_in_order() {
        let bus: Bus<i32> = Bus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |event| o1.lock().unwrap().push(("a", *event)));

        let o2 = order.clone();
        bus.subscribe(move |event| o2.lock().unwrap().push(("b", *event)));

        bus.emit(42);

        let recorded = order.lock().unwrap();
        assert_eq!(*recorded, vec![("a", 42), ("b", 42)]);
    }

    #[test]
    fn emit_with_no_subscribers_is_a_noop() {
        let bus: Bus<i32> = Bus::new();
        bus.emit(1);
    }

    #[test]
    fn subscriber_count_tracks_registrations() {
        let bus: Bus<i32> = Bus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.subscribe(|_| {});
        bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 2);
    }

    /// A handler that panics while holding the subscriber lock poisons the `Mutex`;
    /// the bus must recover and keep serving later `subscribe`/`emit` calls rather
    /// than panicking every caller afterward.
    #[test]
    fn emit_recovers_from_a_poisoned_subscriber_lock() {
        let bus: Bus<i32> = Bus::new();
        bus.subscribe(|_| panic!("boom"));

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| bus.emit(1)));
        assert!(poisoned.is_err());

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn multiple_emits_each_redeliver_to_all_subscribers() {
        let bus: Bus<i32> = Bus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(1);
        bus.emit(2);
        bus.emit(3);

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
