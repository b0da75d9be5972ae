//! Host event subscriptions and the report-config lookup table built
//! from them.
//!
//! Subscriptions only ever widen: applying a subscription to an existing
//! one ORs every flag, so a host can add payload parts but never lose one
//! by re-subscribing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::events::ALL_DEVICES;

/// `(event code, device id)` identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub event_code: String,
    pub device_id: i32,
}

impl SubscriptionKey {
    pub fn new(event_code: impl Into<String>, device_id: i32) -> Self {
        Self {
            event_code: event_code.into(),
            device_id,
        }
    }
}

/// One host subscription as set by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub event_code: String,
    /// Device id, or [`ALL_DEVICES`].
    pub device_id: i32,
    pub send_device_status: bool,
    pub send_class_meters: bool,
    pub send_device_meters: bool,
    pub send_updatable_meters: bool,
    pub send_transaction: bool,
    pub event_persist: bool,
    pub forced_persist: bool,
}

impl EventSubscription {
    /// A subscription with every payload flag off.
    pub fn new(event_code: impl Into<String>, device_id: i32) -> Self {
        Self {
            event_code: event_code.into(),
            device_id,
            send_device_status: false,
            send_class_meters: false,
            send_device_meters: false,
            send_updatable_meters: false,
            send_transaction: false,
            event_persist: false,
            forced_persist: false,
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.event_code.clone(), self.device_id)
    }

    /// OR every flag of `other` into `self`.
    pub fn merge(&mut self, other: &Self) {
        self.send_device_status |= other.send_device_status;
        self.send_class_meters |= other.send_class_meters;
        self.send_device_meters |= other.send_device_meters;
        self.send_updatable_meters |= other.send_updatable_meters;
        self.send_transaction |= other.send_transaction;
        self.event_persist |= other.event_persist;
        self.forced_persist |= other.forced_persist;
    }

    pub fn report_config(&self) -> EventReportConfig {
        EventReportConfig {
            send_device_status: self.send_device_status,
            send_class_meters: self.send_class_meters,
            send_device_meters: self.send_device_meters,
            send_updatable_meters: self.send_updatable_meters,
            send_transaction: self.send_transaction,
            event_persist: self.event_persist,
            forced_persist: self.forced_persist,
        }
    }
}

/// Merge `incoming` into `existing` by key, OR-ing flags of matching
/// entries and appending new ones.
pub fn merge_subscriptions(existing: &mut Vec<EventSubscription>, incoming: &[EventSubscription]) {
    for sub in incoming {
        match existing
            .iter_mut()
            .find(|e| e.event_code == sub.event_code && e.device_id == sub.device_id)
        {
            Some(current) => current.merge(sub),
            None => existing.push(sub.clone()),
        }
    }
}

/// What to attach to one event for one host, and how durably to send it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventReportConfig {
    pub send_device_status: bool,
    pub send_class_meters: bool,
    pub send_device_meters: bool,
    pub send_updatable_meters: bool,
    pub send_transaction: bool,
    pub event_persist: bool,
    pub forced_persist: bool,
}

/// Lookup table from `(event code, device id)` to report config.
#[derive(Debug, Default)]
pub struct ReportConfigTable {
    map: HashMap<SubscriptionKey, EventReportConfig>,
}

impl ReportConfigTable {
    pub fn build(subscriptions: &[EventSubscription]) -> Self {
        let map = subscriptions
            .iter()
            .map(|s| (s.key(), s.report_config()))
            .collect();
        Self { map }
    }

    /// Exact device match first, then the all-devices wildcard.
    pub fn lookup(&self, event_code: &str, device_id: i32) -> Option<EventReportConfig> {
        let exact = SubscriptionKey::new(event_code, device_id);
        self.map
            .get(&exact)
            .or_else(|| self.map.get(&SubscriptionKey::new(event_code, ALL_DEVICES)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
