//! Per-kind event fan-out
//!
//! Listeners run on the event-delivery thread, so the bus is single-threaded
//! (`Rc`/`RefCell`) and listeners need not be `Send`. A listener that panics
//! is isolated: the panic is caught, logged and counted, and delivery moves
//! on to the next listener.

use crate::protocol::event::{Event, EventKind};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

type Listener = Rc<RefCell<dyn FnMut(&Event)>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
}

/// Subscriber registry keyed by [`EventKind`]
///
/// # Example
///
/// ```
/// use kodama_client_core::bus::EventBus;
/// use kodama_client_core::protocol::event::{CameraEvent, Event, EventKind};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let bus = EventBus::new();
/// let seen = Rc::new(Cell::new(0));
/// let counter = seen.clone();
/// let sub = bus.on(EventKind::Camera, move |_| counter.set(counter.get() + 1));
///
/// let event = Event::Camera(CameraEvent { source_id: "cam".into(), connected: true });
/// bus.emit(&event);
/// sub.unsubscribe();
/// bus.emit(&event);
/// assert_eq!(seen.get(), 1);
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Rc<RefCell<Registry>>,
}

/// Handle that removes one listener from the bus
///
/// Dropping the handle keeps the listener registered.
#[derive(Clone)]
pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.borrow_mut();
        if let Some(list) = registry.listeners.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every event of `kind`.
    ///
    /// Listeners of one kind are invoked in subscription order.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: FnMut(&Event) + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        let listener: Listener = Rc::new(RefCell::new(callback));
        registry.listeners.entry(kind).or_default().push((id, listener));

        Subscription {
            registry: Rc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Deliver `event` to every listener of its kind.
    ///
    /// Iterates a snapshot, so listeners may subscribe or unsubscribe while
    /// being called. Returns the number of listeners that panicked.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(u64, Listener)> = match self.registry.borrow().listeners.get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut failures = 0;
        for (id, listener) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| {
                // A listener re-entering its own kind panics here and is
                // reported like any other failure.
                let mut callback = listener.borrow_mut();
                (&mut *callback)(event)
            }));
            if let Err(panic_info) = result {
                failures += 1;
                tracing::error!(
                    kind = %kind,
                    listener = id,
                    source = event.source_id(),
                    panic = %panic_message(panic_info.as_ref()),
                    "Event listener panicked"
                );
            }
        }
        failures
    }

    /// Number of listeners currently registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .borrow()
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.borrow();
        let mut map = f.debug_map();
        for (kind, list) in &registry.listeners {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}

/// Extract a readable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
