//! Per-host event handler: filtering, queueing, persistence and delivery.
//!
//! ```text
//!  Registry ──accept()──▶ [closed?] ──▶ pre-open buffer ──(open)──┐
//!                             │                                   │
//!                             ▼                                   ▼
//!                      subscription filter ──▶ persist? ──▶ EventQueue
//!                                                                 │
//!                                        delivery thread ◀── peek head
//!                                              │  (host enabled + CanSend)
//!                        persist: request, dequeue on ack, else wait TTL and retry
//!                        other:   notification, dequeue
//! ```
//!
//! Locks: `state` guards the queue, subscriptions and flags.  The registry
//! lock is always taken before `state`, never after.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::queue::{EventQueue, merge_for_restart};
use super::registry::EventHandlerRegistry;
use super::report::{Occurrence, QueuedEvent, StampedOccurrence, SupportedEvent};
use super::subscription::{
    EventSubscription, ReportConfigTable, SubscriptionKey, merge_subscriptions,
};
use crate::app::host::HostContext;
use crate::app::ports::EventStore;
use crate::cancel::CancellationToken;
use crate::config::{EventHandlerConfig, OptionSource};
use crate::error::ConfigError;
use crate::events::{COMMS_EVENTS, DeviceClass, EVENT_HANDLER_EVENTS, G2S_EVE001, G2S_EVE005};
use crate::message::{Command, Request, SessionState};
use crate::worker::spawn_worker;

// ───────────────────────────────────────────────────────────────
// Shared state
// ───────────────────────────────────────────────────────────────

struct HandlerState {
    config: EventHandlerConfig,
    open: bool,
    /// The host disabled this handler.
    host_disabled: bool,
    queue: EventQueue,
    subscriptions: Vec<EventSubscription>,
    table: ReportConfigTable,
    /// Occurrences reported while closed, replayed on open.
    pre_open: VecDeque<StampedOccurrence>,
    supported: BTreeSet<SupportedEvent>,
    /// A delivery thread of the current generation is running.
    delivering: bool,
    /// Bumped on every open; stale delivery threads compare against it.
    generation: u64,
    token: CancellationToken,
}

pub(crate) struct HandlerShared {
    host: HostContext,
    store: Arc<dyn EventStore>,
    registry: Weak<EventHandlerRegistry>,
    state: Mutex<HandlerState>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl HandlerShared {
    fn host_id(&self) -> i32 {
        self.host.host_id
    }

    /// Registry entry point: filter, queue and wake delivery.
    pub(super) fn accept(self: &Arc<Self>, stamped: &StampedOccurrence) {
        let mut st = self.state.lock();
        if !st.open {
            if st.pre_open.len() >= st.config.min_log_entries {
                st.pre_open.pop_front();
            }
            st.pre_open.push_back(stamped.clone());
            return;
        }
        self.queue_for_send(&mut st, stamped);
        self.ensure_delivery(&mut st);
    }

    fn queue_for_send(&self, st: &mut HandlerState, stamped: &StampedOccurrence) {
        let occ = &stamped.occurrence;
        let Some(config) = st.table.lookup(&occ.event_code, occ.device_id) else {
            debug!(
                "EVT[{}] #{} {} not subscribed, dropped",
                self.host_id(),
                stamped.event_id,
                occ.event_code
            );
            return;
        };
        let disabled = !self.host.status.host_enabled() || st.host_disabled;
        if disabled && !config.forced_persist {
            debug!(
                "EVT[{}] #{} {} dropped, host disabled",
                self.host_id(),
                stamped.event_id,
                occ.event_code
            );
            return;
        }

        let event = QueuedEvent::from_occurrence(stamped.event_id, occ, &config);
        let durable = event.persist.then(|| event.clone());
        let outcome = st.queue.enqueue(event);
        if let (true, Some(event)) = (outcome.accepted, &durable) {
            self.persist(event, st.config.min_log_entries);
        }
        if let Some(evicted) = outcome.evicted {
            debug!("EVT[{}] #{} evicted by overflow", self.host_id(), evicted);
        }
        if outcome.overflow_entered {
            self.inject_meta(st, G2S_EVE005);
        }
        if outcome.disabled {
            warn!("EVT[{}] handler disabled by queue overflow", self.host_id());
            self.inject_meta(st, G2S_EVE001);
        }
    }

    /// Queue an event-handler meta event directly, bypassing the
    /// subscription filter and the overflow policy.
    fn inject_meta(&self, st: &mut HandlerState, code: &'static str) {
        let event_id = self.store.next_event_id();
        let occ = Occurrence::new(DeviceClass::EventHandler, self.host_id(), code);
        let config = st.table.lookup(code, self.host_id()).unwrap_or_default();
        let event = QueuedEvent::from_occurrence(event_id, &occ, &config);
        let durable = event.persist.then(|| event.clone());
        if !st.queue.inject(event) {
            warn!("EVT[{}] #{} {} dropped, meta slots full", self.host_id(), event_id, code);
            return;
        }
        info!("EVT[{}] #{} {} injected", self.host_id(), event_id, code);
        if let Some(event) = &durable {
            self.persist(event, st.config.min_log_entries);
        }
    }

    fn persist(&self, event: &QueuedEvent, max_entries: usize) {
        if let Err(e) = self.store.add_event_log(self.host_id(), event, max_entries) {
            warn!(
                "EVT[{}] #{} not persisted: {}",
                self.host_id(),
                event.event_id,
                e
            );
        }
    }

    /// Start a delivery thread if there is work and none is running.
    fn ensure_delivery(self: &Arc<Self>, st: &mut HandlerState) {
        if !st.open || st.delivering || st.queue.is_empty() {
            return;
        }
        st.delivering = true;
        let shared = Arc::clone(self);
        let token = st.token.clone();
        let generation = st.generation;
        match spawn_worker(format!("evt-delivery-{}", self.host_id()), move || {
            shared.delivery_loop(&token, generation);
        }) {
            Ok(handle) => {
                // A previous handle belongs to a finished or cancelled thread.
                drop(self.delivery.lock().replace(handle));
            }
            Err(e) => {
                st.delivering = false;
                error!("EVT[{}] delivery thread failed to start: {}", self.host_id(), e);
            }
        }
    }

    fn delivery_loop(self: &Arc<Self>, token: &CancellationToken, generation: u64) {
        debug!("EVT[{}] delivery started", self.host_id());
        loop {
            if token.is_cancelled() {
                break;
            }
            let (poll, ttl, held) = {
                let st = self.state.lock();
                (
                    st.config.poll_interval(),
                    st.config.time_to_live(),
                    st.host_disabled,
                )
            };

            if held || !self.host.status.host_enabled() || !self.host.queue.can_send() {
                if token.wait_timeout(poll) {
                    break;
                }
                continue;
            }

            let head = {
                let mut st = self.state.lock();
                if !st.open || st.generation != generation {
                    break;
                }
                if let Some(head) = st.queue.front() {
                    head.clone()
                } else {
                    st.delivering = false;
                    debug!("EVT[{}] delivery idle", self.host_id());
                    return;
                }
            };

            let request = Request::new(
                self.host_id(),
                DeviceClass::EventHandler,
                self.host_id(),
                Command::EventReport(head.clone()),
            );

            if head.persist {
                let mut session = self.host.queue.send(request, Some(ttl));
                let state = session.wait_for_completion(Some(ttl));
                self.host.session_completed(state, session.request_error());
                if state != SessionState::Success {
                    warn!(
                        "EVT[{}] #{} delivery {:?}, retrying",
                        self.host_id(),
                        head.event_id,
                        state
                    );
                    if token.wait_timeout(ttl) {
                        break;
                    }
                    continue;
                }
            } else {
                self.host.queue.send_notification(request);
            }
            self.complete(&head);
            self.flush_recovery();
        }

        let mut st = self.state.lock();
        if st.generation == generation {
            st.delivering = false;
        }
        debug!("EVT[{}] delivery stopped", self.host_id());
    }

    fn complete(&self, head: &QueuedEvent) {
        let mut st = self.state.lock();
        if st.queue.dequeue(head.event_id).is_none() {
            debug!(
                "EVT[{}] #{} left the queue during delivery",
                self.host_id(),
                head.event_id
            );
        }
        drop(st);
        if head.persist {
            if let Err(e) = self.store.acknowledge_event(self.host_id(), head.event_id) {
                warn!(
                    "EVT[{}] #{} ack not persisted: {}",
                    self.host_id(),
                    head.event_id,
                    e
                );
            }
        }
    }

    fn flush_recovery(&self) {
        let recovery = self.state.lock().queue.take_recovery();
        if recovery.is_empty() {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        for code in recovery {
            info!("EVT[{}] flushing recovery event {}", self.host_id(), code);
            registry.report_code(DeviceClass::EventHandler, self.host_id(), code);
        }
    }

    pub(super) fn add_supported(&self, events: &[SupportedEvent]) {
        self.state.lock().supported.extend(events.iter().cloned());
        if let Err(e) = self.store.add_supported_events(self.host_id(), events) {
            warn!("EVT[{}] supported events not persisted: {}", self.host_id(), e);
        }
    }

    pub(super) fn remove_supported(&self, events: &[SupportedEvent]) {
        {
            let mut st = self.state.lock();
            for e in events {
                st.supported.remove(e);
            }
        }
        if let Err(e) = self.store.remove_supported_events(self.host_id(), events) {
            warn!("EVT[{}] supported events not removed: {}", self.host_id(), e);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Public handle
// ───────────────────────────────────────────────────────────────

/// The event handler device for one host.
///
/// Constructing one attaches it to the registry; dropping it closes it
/// and detaches it.
pub struct EventHandler {
    shared: Arc<HandlerShared>,
    registry: Arc<EventHandlerRegistry>,
}

impl EventHandler {
    pub fn new(
        host: HostContext,
        config: EventHandlerConfig,
        registry: &Arc<EventHandlerRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = Arc::clone(registry.store());
        let host_id = host.host_id;

        let subscriptions = store.subscriptions(host_id).unwrap_or_else(|e| {
            warn!("EVT[{}] stored subscriptions unreadable: {}", host_id, e);
            Vec::new()
        });
        let table = ReportConfigTable::build(&subscriptions);
        let queue = EventQueue::new(
            config.min_log_entries,
            config.queue_behavior,
            config.disable_behavior,
        );

        let shared = Arc::new(HandlerShared {
            host,
            store,
            registry: Arc::downgrade(registry),
            state: Mutex::new(HandlerState {
                config,
                open: false,
                host_disabled: false,
                queue,
                subscriptions,
                table,
                pre_open: VecDeque::new(),
                supported: BTreeSet::new(),
                delivering: false,
                generation: 0,
                token: CancellationToken::new(),
            }),
            delivery: Mutex::new(None),
        });

        let defaults: Vec<SupportedEvent> = EVENT_HANDLER_EVENTS
            .iter()
            .map(|code| SupportedEvent::new(DeviceClass::EventHandler, host_id, *code))
            .chain(
                COMMS_EVENTS
                    .iter()
                    .map(|code| SupportedEvent::new(DeviceClass::Communications, host_id, *code)),
            )
            .collect();
        shared.add_supported(&defaults);
        registry.attach(Arc::clone(&shared));

        info!("EVT[{}] event handler created", host_id);
        Ok(Self {
            shared,
            registry: Arc::clone(registry),
        })
    }

    pub fn host_id(&self) -> i32 {
        self.shared.host_id()
    }

    /// Open the handler: restore unsent persisted events, replay anything
    /// reported while closed, and start delivery.
    pub fn open(&self) {
        let shared = &self.shared;
        let host_id = shared.host_id();
        self.registry.exclusive(|| {
            let mut st = shared.state.lock();
            if st.open {
                return;
            }
            let persisted = shared.store.unsent_events(host_id).unwrap_or_else(|e| {
                warn!("EVT[{}] unsent events unreadable: {}", host_id, e);
                Vec::new()
            });
            let in_memory = st.queue.drain();
            let merged = merge_for_restart(persisted, in_memory);
            info!(
                "EVT[{}] open: {} event(s) restored, {} replayed",
                host_id,
                merged.len(),
                st.pre_open.len()
            );
            if st.queue.refill(merged) {
                shared.inject_meta(&mut st, G2S_EVE005);
            }

            st.open = true;
            st.generation += 1;
            st.token = CancellationToken::new();
            st.delivering = false;

            let replay: Vec<StampedOccurrence> = st.pre_open.drain(..).collect();
            for stamped in &replay {
                shared.queue_for_send(&mut st, stamped);
            }
            shared.ensure_delivery(&mut st);
        });
    }

    /// Stop delivery and wait for the delivery thread to exit.  Queued
    /// events stay in memory for the next open.
    pub fn close(&self) {
        {
            let mut st = self.shared.state.lock();
            if !st.open {
                return;
            }
            st.open = false;
            st.delivering = false;
            st.token.cancel();
        }
        let handle = self.shared.delivery.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("EVT[{}] delivery thread panicked", self.host_id());
            }
        }
        info!("EVT[{}] closed", self.host_id());
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Merge `subscriptions` into the host's set (flags only ever widen),
    /// persist and rebuild the filter.  Returns whether any subscription
    /// exists afterwards.
    pub fn set_event_subscriptions(&self, subscriptions: &[EventSubscription]) -> bool {
        let mut st = self.shared.state.lock();
        merge_subscriptions(&mut st.subscriptions, subscriptions);
        if let Err(e) = self
            .shared
            .store
            .save_subscriptions(self.host_id(), &st.subscriptions)
        {
            warn!("EVT[{}] subscriptions not persisted: {}", self.host_id(), e);
        }
        st.table = ReportConfigTable::build(&st.subscriptions);
        debug!(
            "EVT[{}] {} subscription(s) active",
            self.host_id(),
            st.subscriptions.len()
        );
        !st.subscriptions.is_empty()
    }

    pub fn clear_event_subscriptions(&self, keys: &[SubscriptionKey]) {
        let mut st = self.shared.state.lock();
        st.subscriptions.retain(|s| !keys.contains(&s.key()));
        if let Err(e) = self.shared.store.remove_subscriptions(self.host_id(), keys) {
            warn!("EVT[{}] subscriptions not removed: {}", self.host_id(), e);
        }
        st.table = ReportConfigTable::build(&st.subscriptions);
    }

    pub fn event_subscriptions(&self) -> Vec<EventSubscription> {
        self.shared.state.lock().subscriptions.clone()
    }

    pub fn supported_events(&self) -> Vec<SupportedEvent> {
        self.shared.state.lock().supported.iter().cloned().collect()
    }

    /// Reconfigure capacity and overflow policy from host options.
    pub fn apply_options(&self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        let mut st = self.shared.state.lock();
        let mut config = st.config.clone();
        config.apply_options(src)?;
        st.queue.reconfigure(
            config.min_log_entries,
            config.queue_behavior,
            config.disable_behavior,
        );
        st.config = config;
        Ok(())
    }

    /// Host request to enable or disable the handler.  Enabling is
    /// refused while the queue holds it auto-disabled.
    pub fn set_enabled(&self, enable: bool) -> bool {
        let mut st = self.shared.state.lock();
        if enable && st.queue.is_auto_disabled() {
            warn!(
                "EVT[{}] enable refused, disabled by queue overflow",
                self.host_id()
            );
            return false;
        }
        st.host_disabled = !enable;
        true
    }

    pub fn is_enabled(&self) -> bool {
        let st = self.shared.state.lock();
        !st.host_disabled && !st.queue.is_auto_disabled()
    }

    pub fn in_overflow(&self) -> bool {
        self.shared.state.lock().queue.in_overflow()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Ids of queued events, head first.
    pub fn queued_event_ids(&self) -> Vec<u64> {
        self.shared.state.lock().queue.event_ids()
    }

    /// Occurrences buffered while closed.
    pub fn pre_open_len(&self) -> usize {
        self.shared.state.lock().pre_open.len()
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.registry.detach(&self.shared);
        self.close();
    }
}
