//! Event handler registry: global event ids and fan-out to every host.
//!
//! ```text
//!  device ──report()──▶ Registry ──next_event_id()──▶ EventStore
//!                          │
//!                          ├──▶ EventHandler (host 1) ── filter ── queue ── delivery thread
//!                          ├──▶ EventHandler (host 2) ── filter ── queue ── delivery thread
//!                          └──▶ ...
//! ```
//!
//! One registry per EGM.  It is owned explicitly and handed to every
//! device that reports events; handlers attach on construction and detach
//! on drop.  Id allocation and fan-out happen under the registry lock, so
//! every host sees occurrences in event-id order.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::handler::HandlerShared;
use super::report::{Occurrence, StampedOccurrence, SupportedEvent};
use crate::app::ports::EventStore;
use crate::events::DeviceClass;

struct RegistryInner {
    handlers: Vec<Arc<HandlerShared>>,
    /// Every event a device has declared, replayed to handlers as they attach.
    declared: BTreeSet<SupportedEvent>,
}

pub struct EventHandlerRegistry {
    store: Arc<dyn EventStore>,
    inner: Mutex<RegistryInner>,
}

impl EventHandlerRegistry {
    pub fn new(store: Arc<dyn EventStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            inner: Mutex::new(RegistryInner {
                handlers: Vec::new(),
                declared: BTreeSet::new(),
            }),
        })
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Declare that a device can raise `event_code`.
    pub fn register_event(&self, device_class: DeviceClass, device_id: i32, event_code: &str) {
        let event = SupportedEvent::new(device_class, device_id, event_code);
        let mut inner = self.inner.lock();
        if inner.declared.insert(event.clone()) {
            for handler in &inner.handlers {
                handler.add_supported(std::slice::from_ref(&event));
            }
        }
    }

    pub fn unregister_event(&self, device_class: DeviceClass, device_id: i32, event_code: &str) {
        let event = SupportedEvent::new(device_class, device_id, event_code);
        let mut inner = self.inner.lock();
        if inner.declared.remove(&event) {
            for handler in &inner.handlers {
                handler.remove_supported(std::slice::from_ref(&event));
            }
        }
    }

    /// Report an occurrence to every host.  Returns the event id assigned,
    /// which is allocated whether or not any host wants the event.
    pub fn report(&self, occurrence: Occurrence) -> u64 {
        let inner = self.inner.lock();
        let event_id = self.store.next_event_id();
        debug!(
            "EVT report #{} {} {}[{}] to {} handler(s)",
            event_id,
            occurrence.event_code,
            occurrence.device_class,
            occurrence.device_id,
            inner.handlers.len()
        );
        let stamped = StampedOccurrence {
            event_id,
            occurrence: Arc::new(occurrence),
        };
        for handler in &inner.handlers {
            handler.accept(&stamped);
        }
        event_id
    }

    /// Convenience for the common code-only report.
    pub fn report_code(&self, device_class: DeviceClass, device_id: i32, event_code: &str) -> u64 {
        self.report(Occurrence::new(device_class, device_id, event_code))
    }

    // ── Handler lifecycle ─────────────────────────────────────

    pub(super) fn attach(&self, handler: Arc<HandlerShared>) {
        let mut inner = self.inner.lock();
        let declared: Vec<SupportedEvent> = inner.declared.iter().cloned().collect();
        if !declared.is_empty() {
            handler.add_supported(&declared);
        }
        inner.handlers.push(handler);
    }

    pub(super) fn detach(&self, handler: &Arc<HandlerShared>) {
        self.inner.lock().handlers.retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Run `f` with the registry lock held, serialising it against
    /// reports so any ids it allocates stay in order.
    pub(super) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.lock();
        f()
    }
}
