//! Handler registry with per-dispatch failure isolation.
//!
//! Used by the Monitor and the Mail Queue to fan events out to any number of
//! subscribers. A handler that panics is logged and skipped; the publisher
//! never sees the failure.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use tracing::warn;

pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Default)]
struct GateState {
    closed: bool,
    /// One entry per call currently inside the handler.
    running: Vec<ThreadId>,
}

/// Admits handler calls until closed. Closing waits for calls running on
/// other threads; calls on the closing thread itself are its own callers.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.running.push(thread::current().id());
        true
    }

    fn leave(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        if let Some(i) = state.running.iter().position(|t| *t == me) {
            state.running.swap_remove(i);
        }
        self.idle.notify_all();
    }

    fn close(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        state.closed = true;
        while state.running.iter().any(|t| *t != me) {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}

struct Entry<E> {
    id: u64,
    gate: Arc<Gate>,
    handler: Handler<E>,
}

struct Registry<E> {
    next_id: u64,
    entries: Vec<Entry<E>>,
}

/// A list of subscribers for one event type.
pub struct Listeners<E> {
    name: &'static str,
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> Listeners<E> {
    /// `name` only appears in diagnostics.
    pub fn new(name: &'static str) -> Self {
        Listeners {
            name,
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let gate = Arc::new(Gate::default());
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            gate: gate.clone(),
            handler: Arc::new(handler),
        });

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            gate,
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entries
                        .retain(|e| e.id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every active handler, in registration order.
    /// Returns the number of handlers that completed without panicking.
    pub fn emit(&self, event: &E) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let snapshot: Vec<(Arc<Gate>, Handler<E>)> = self
            .lock()
            .entries
            .iter()
            .map(|e| (e.gate.clone(), e.handler.clone()))
            .collect();

        let mut delivered = 0;
        for (gate, handler) in snapshot {
            if !gate.enter() {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            gate.leave();
            match outcome {
                Ok(()) => delivered += 1,
                Err(_) => warn!(channel = self.name, "subscriber panicked; event dropped for it"),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the handler registered;
/// call [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    gate: Arc<Gate>,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Stop delivery. Waits for calls already running on other threads, so
    /// the handler is never entered again once this returns.
    pub fn unsubscribe(mut self) {
        self.gate.close();
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }
}
