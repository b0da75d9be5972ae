//! Bounded per-host event queue with the overflow state machine.
//!
//! ```text
//!            size < capacity                    size >= capacity
//!   NORMAL ─────────────────▶ push      NORMAL ─────────────────▶ OVERFLOW
//!                                                                    │
//!        Overwrite: drop oldest, push                                │
//!        Discard:   drop newest                                      │
//!        Disable:   disable once, then Overwrite | Discard           │
//!                                                                    ▼
//!   NORMAL ◀──── dequeue brings size below capacity ──── recovery events
//! ```
//!
//! The queue itself never builds events: it tells the caller what happened
//! (entered overflow, disabled the handler) and holds the recovery event
//! codes until the caller flushes them.
//!
//! Capacity bounds reports only.  Overflow meta events ride in up to
//! [`META_SLOTS`] extra slots so they never displace a report.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, warn};

use super::report::QueuedEvent;
use crate::config::{DisableBehavior, QueueBehavior};
use crate::events::{G2S_EVE002, G2S_EVE006};

/// Recovery events waiting to be flushed (overflow cleared, re-enabled).
pub type RecoveryEvents = heapless::Vec<&'static str, 2>;

/// Meta events held past capacity at once: overflow entered and disabled.
pub const META_SLOTS: usize = 2;

#[derive(Debug)]
struct Entry {
    event: QueuedEvent,
    meta: bool,
}

impl Entry {
    fn report(event: QueuedEvent) -> Self {
        Self { event, meta: false }
    }
}

/// What an enqueue did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// The new event is in the queue.
    pub accepted: bool,
    /// Event dropped to make room.
    pub evicted: Option<u64>,
    /// This enqueue moved the queue into overflow.
    pub overflow_entered: bool,
    /// This enqueue auto-disabled the handler.
    pub disabled: bool,
}

#[derive(Debug)]
pub struct EventQueue {
    entries: VecDeque<Entry>,
    capacity: usize,
    behavior: QueueBehavior,
    disable_behavior: DisableBehavior,
    overflow: bool,
    auto_disabled: bool,
    recovery: RecoveryEvents,
    /// Events lost to overflow since construction.
    dropped: u64,
}

impl EventQueue {
    pub fn new(capacity: usize, behavior: QueueBehavior, disable_behavior: DisableBehavior) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            behavior,
            disable_behavior,
            overflow: false,
            auto_disabled: false,
            recovery: RecoveryEvents::new(),
            dropped: 0,
        }
    }

    /// Change capacity and policy.  Existing entries are kept.
    pub fn reconfigure(
        &mut self,
        capacity: usize,
        behavior: QueueBehavior,
        disable_behavior: DisableBehavior,
    ) {
        self.capacity = capacity.max(1);
        self.behavior = behavior;
        self.disable_behavior = disable_behavior;
    }

    /// Every queued entry, meta events included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Queued reports, the entries capacity applies to.
    pub fn report_len(&self) -> usize {
        self.entries.iter().filter(|e| !e.meta).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_overflow(&self) -> bool {
        self.overflow
    }

    pub fn is_auto_disabled(&self) -> bool {
        self.auto_disabled
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn front(&self) -> Option<&QueuedEvent> {
        self.entries.front().map(|e| &e.event)
    }

    pub fn event_ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.event.event_id).collect()
    }

    /// Enqueue under the configured overflow policy.
    pub fn enqueue(&mut self, event: QueuedEvent) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::default();
        if self.report_len() < self.capacity {
            self.entries.push_back(Entry::report(event));
            outcome.accepted = true;
            return outcome;
        }

        if !self.overflow {
            self.overflow = true;
            outcome.overflow_entered = true;
            warn!("Event queue overflow (capacity {})", self.capacity);
        }

        let overwrite = match self.behavior {
            QueueBehavior::Overwrite => true,
            QueueBehavior::Discard => false,
            QueueBehavior::Disable => {
                if !self.auto_disabled {
                    self.auto_disabled = true;
                    outcome.disabled = true;
                }
                self.disable_behavior == DisableBehavior::Overwrite
            }
        };

        self.dropped += 1;
        if overwrite {
            outcome.evicted = self.evict_oldest_report();
            self.entries.push_back(Entry::report(event));
            outcome.accepted = true;
        } else {
            debug!("Event {} discarded on full queue", event.event_id);
        }
        outcome
    }

    fn evict_oldest_report(&mut self) -> Option<u64> {
        let at = self.entries.iter().position(|e| !e.meta)?;
        self.entries.remove(at).map(|e| e.event.event_id)
    }

    /// Queue an overflow meta event outside the policy and the capacity
    /// bound.  Returns `false` when every meta slot is taken.
    pub fn inject(&mut self, event: QueuedEvent) -> bool {
        if self.entries.len() - self.report_len() >= META_SLOTS {
            debug!("Meta event {} dropped, no free slot", event.event_id);
            return false;
        }
        self.entries.push_back(Entry { event, meta: true });
        true
    }

    /// Remove the head if it is `event_id`.  Leaving overflow queues the
    /// recovery events.
    pub fn dequeue(&mut self, event_id: u64) -> Option<QueuedEvent> {
        if self.front().map(|e| e.event_id) != Some(event_id) {
            return None;
        }
        let head = self.entries.pop_front().map(|e| e.event);
        if self.overflow && self.report_len() < self.capacity {
            self.overflow = false;
            self.push_recovery(G2S_EVE006);
            if self.auto_disabled {
                self.auto_disabled = false;
                self.push_recovery(G2S_EVE002);
            }
        }
        head
    }

    fn push_recovery(&mut self, code: &'static str) {
        if !self.recovery.contains(&code) && self.recovery.push(code).is_err() {
            debug!("Recovery event {} already pending", code);
        }
    }

    pub fn pending_recovery(&self) -> &[&'static str] {
        &self.recovery
    }

    /// Take the pending recovery events once the queue has drained below
    /// `capacity - pending`.  An empty queue always has room.
    pub fn take_recovery(&mut self) -> RecoveryEvents {
        let pending = self.recovery.len();
        let len = self.report_len();
        if pending == 0 || (len > 0 && len >= self.capacity.saturating_sub(pending)) {
            return RecoveryEvents::new();
        }
        std::mem::take(&mut self.recovery)
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedEvent> {
        self.entries.drain(..).map(|e| e.event).collect()
    }

    /// Refill an emptied queue from events already in ascending order,
    /// keeping the newest `capacity`.  Returns whether dropping the excess
    /// moved the queue into overflow.
    pub fn refill(&mut self, events: Vec<QueuedEvent>) -> bool {
        let excess = events.len().saturating_sub(self.capacity);
        self.entries.extend(events.into_iter().skip(excess).map(Entry::report));
        if excess == 0 {
            return false;
        }
        self.dropped += excess as u64;
        warn!("Event queue refill dropped {} oldest event(s)", excess);
        if self.overflow {
            return false;
        }
        self.overflow = true;
        true
    }
}

/// Merge persisted-but-unacknowledged events with events still queued in
/// memory: one entry per event id, ascending.
pub fn merge_for_restart(
    persisted: Vec<QueuedEvent>,
    in_memory: Vec<QueuedEvent>,
) -> Vec<QueuedEvent> {
    let mut merged: BTreeMap<u64, QueuedEvent> = BTreeMap::new();
    for event in persisted.into_iter().chain(in_memory) {
        merged.entry(event.event_id).or_insert(event);
    }
    merged.into_values().collect()
}
