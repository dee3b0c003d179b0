//! In-process fan-out of lifecycle events.

use crate::model::PendingAction;
use crate::model::SwapRecord;
use arkswap_provider::SwapStatus;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

/// Events emitted by the lifecycle engine.
#[derive(Debug, Clone)]
pub enum SwapEvent {
    /// A swap's status changed; carries the status it changed away from.
    SwapUpdate {
        record: SwapRecord,
        old_status: SwapStatus,
    },
    /// A swap reached a terminal success status.
    SwapCompleted { record: SwapRecord },
    /// A swap reached a terminal failure, or a non-retryable error ended an
    /// action.
    SwapFailed {
        record: SwapRecord,
        error: String,
    },
    /// The orchestrator finished an action for a swap.
    ActionExecuted {
        record: SwapRecord,
        action: PendingAction,
    },
    /// The real-time connection came up.
    Connected,
    /// The real-time connection went down; polling fallback takes over.
    Disconnected { reason: Option<String> },
}

type Observer = Arc<dyn Fn(&SwapEvent) + Send + Sync>;

/// A synchronous observer registry.
///
/// Observers run in registration order on the emitting task. A panicking
/// observer is caught and logged so the remaining observers still run.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<(usize, Observer)>>>,
    next_id: Arc<AtomicUsize>,
}

/// Handle returned by [`EventBus::subscribe`]; dropping it does nothing,
/// call [`Subscription::unsubscribe`] to detach the observer.
pub struct Subscription {
    id: usize,
    inner: Arc<Mutex<Vec<(usize, Observer)>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut observers = self.inner.lock().expect("observer registry lock");
        observers.retain(|(id, _)| *id != self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SwapEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut observers = self.inner.lock().expect("observer registry lock");
        observers.push((id, Arc::new(observer)));

        Subscription {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn emit(&self, event: &SwapEvent) {
        let observers = {
            let observers = self.inner.lock().expect("observer registry lock");
            observers.clone()
        };

        for (id, observer) in observers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| observer(event)));
            if result.is_err() {
                tracing::error!(observer_id = id, "Event observer panicked; continuing");
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().expect("observer registry lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::reverse_swap;
    use std::sync::atomic::AtomicU32;

    fn test_event() -> SwapEvent {
        SwapEvent::SwapCompleted {
            record: reverse_swap("r1", SwapStatus::InvoiceSettled, None),
        }
    }

    #[test]
    fn observers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3u32 {
            let order = Arc::clone(&order);
            bus.subscribe(move |_| order.lock().expect("lock").push(tag));
        }

        bus.emit(&test_event());

        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_detaches_single_observer() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_a = Arc::clone(&calls);
        let sub_a = bus.subscribe(move |_| {
            calls_a.fetch_add(1, Ordering::SeqCst);
        });
        let calls_b = Arc::clone(&calls);
        let _sub_b = bus.subscribe(move |_| {
            calls_b.fetch_add(10, Ordering::SeqCst);
        });

        sub_a.unsubscribe();
        bus.emit(&test_event());

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(bus.observer_count(), 1);
    }

    #[test]
    fn panicking_observer_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU32::new(0));

        bus.subscribe(|_| panic!("observer bug"));
        let reached_clone = Arc::clone(&reached);
        bus.subscribe(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&test_event());

        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
