//! Event occurrences and the per-host reports built from them.
//!
//! An [`Occurrence`] is what a device reports: class, id, code and any
//! payload it has to hand.  The registry stamps it with a global event id;
//! each host then shapes its own [`QueuedEvent`] from it, keeping only the
//! payload parts that host's [`EventReportConfig`] asks for.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subscription::EventReportConfig;
use crate::events::DeviceClass;

// ───────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────

/// Device status snapshot attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub egm_enabled: bool,
    pub host_enabled: bool,
    pub egm_locked: bool,
    pub host_locked: bool,
    /// Class-specific status attributes.
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeterScope {
    Class,
    Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub scope: MeterScope,
    pub name: String,
    pub value: i64,
    /// The event can change this meter.
    pub updatable: bool,
}

/// Opaque transaction log record attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: u64,
    pub log_sequence: u64,
    pub detail: String,
}

// ───────────────────────────────────────────────────────────────
// Occurrence (device side)
// ───────────────────────────────────────────────────────────────

/// One thing that happened on a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub device_class: DeviceClass,
    pub device_id: i32,
    pub event_code: String,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub device_status: Option<DeviceStatus>,
    pub meters: Vec<Meter>,
    pub transaction_id: Option<u64>,
    pub transactions: Vec<TransactionRecord>,
}

impl Occurrence {
    pub fn new(device_class: DeviceClass, device_id: i32, event_code: impl Into<String>) -> Self {
        Self {
            device_class,
            device_id,
            event_code: event_code.into(),
            timestamp: Utc::now(),
            text: None,
            device_status: None,
            meters: Vec::new(),
            transaction_id: None,
            transactions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.device_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_meters(mut self, meters: Vec<Meter>) -> Self {
        self.meters = meters;
        self
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction_id: u64, records: Vec<TransactionRecord>) -> Self {
        self.transaction_id = Some(transaction_id);
        self.transactions = records;
        self
    }
}

/// An occurrence stamped with its global event id, shared across hosts.
#[derive(Debug, Clone)]
pub struct StampedOccurrence {
    pub event_id: u64,
    pub occurrence: Arc<Occurrence>,
}

// ───────────────────────────────────────────────────────────────
// QueuedEvent (host side)
// ───────────────────────────────────────────────────────────────

/// One event report bound for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub event_id: u64,
    pub device_class: DeviceClass,
    pub device_id: i32,
    pub event_code: String,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub transaction_id: Option<u64>,
    pub device_status: Option<DeviceStatus>,
    pub meters: Vec<Meter>,
    pub transactions: Vec<TransactionRecord>,
    /// Delivery needs a host acknowledgement and survives restarts.
    /// Set by either `event_persist` or `forced_persist`.
    pub persist: bool,
}

impl QueuedEvent {
    /// Shape a host report from a stamped occurrence.
    pub fn from_occurrence(event_id: u64, occ: &Occurrence, config: &EventReportConfig) -> Self {
        let meters = occ
            .meters
            .iter()
            .filter(|m| match m.scope {
                MeterScope::Class => config.send_class_meters,
                MeterScope::Device => config.send_device_meters,
            })
            .filter(|m| !config.send_updatable_meters || m.updatable)
            .cloned()
            .collect();

        Self {
            event_id,
            device_class: occ.device_class,
            device_id: occ.device_id,
            event_code: occ.event_code.clone(),
            timestamp: occ.timestamp,
            text: occ.text.clone(),
            transaction_id: occ.transaction_id,
            device_status: if config.send_device_status {
                occ.device_status.clone()
            } else {
                None
            },
            meters,
            transactions: if config.send_transaction {
                occ.transactions.clone()
            } else {
                Vec::new()
            },
            persist: config.event_persist || config.forced_persist,
        }
    }
}

/// A persisted event and whether the host has acknowledged it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event: QueuedEvent,
    pub acknowledged: bool,
}

/// An event a device declared it can raise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SupportedEvent {
    pub device_class: DeviceClass,
    pub device_id: i32,
    pub event_code: String,
}

impl SupportedEvent {
    pub fn new(device_class: DeviceClass, device_id: i32, event_code: impl Into<String>) -> Self {
        Self {
            device_class,
            device_id,
            event_code: event_code.into(),
        }
    }
}
