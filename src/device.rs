//! Host-oriented device composition.
//!
//! Every device owned by a host is a [`DeviceCore`] plus the operations of
//! its class.  The core carries what all of them share: class, id, owning
//! host, configuration, open flag, the event registry to report through,
//! and the cancellation token for long retry chains.
//!
//! [`DeviceKind`] is the closed set of device variants a host owns; a
//! [`DeviceSet`] opens them in order and closes them in reverse.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::app::comms::HostComms;
use crate::app::host::HostContext;
use crate::cancel::CancellationToken;
use crate::config::{DeviceConfig, OptionSource};
use crate::devices::{
    DownloadDevice, GatDevice, HandpayDevice, IdReaderDevice, ProgressiveDevice, VoucherDevice,
};
use crate::error::ConfigError;
use crate::event_handler::{EventHandler, EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Request};

// ───────────────────────────────────────────────────────────────
// DeviceCore
// ───────────────────────────────────────────────────────────────

pub struct DeviceCore {
    class: DeviceClass,
    id: i32,
    host: HostContext,
    registry: Arc<EventHandlerRegistry>,
    config: RwLock<DeviceConfig>,
    /// Bumped every time options are applied.
    config_id: AtomicU64,
    open: AtomicBool,
    /// Shared by every retry chain on this device; cancelled on close.
    cancel: Mutex<Option<CancellationToken>>,
}

impl DeviceCore {
    pub fn new(
        class: DeviceClass,
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            class,
            id,
            host,
            registry: Arc::clone(registry),
            config: RwLock::new(config),
            config_id: AtomicU64::new(0),
            open: AtomicBool::new(false),
            cancel: Mutex::new(None),
        })
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn host_id(&self) -> i32 {
        self.host.host_id
    }

    pub fn config_id(&self) -> u64 {
        self.config_id.load(Ordering::Acquire)
    }

    pub fn time_to_live(&self) -> Duration {
        self.config.read().time_to_live()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open and sendable: the precondition for every host request.
    pub fn can_send(&self) -> bool {
        self.is_open() && self.host.queue.can_send()
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
        if !open {
            self.cancel_pending();
        }
        debug!(
            "{}[{}] host {} {}",
            self.class,
            self.id,
            self.host_id(),
            if open { "opened" } else { "closed" }
        );
    }

    /// The retry-chain token, created on first use and reused until the
    /// device closes.
    pub fn retry_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .get_or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Cancel every retry chain in flight.  The next chain gets a fresh
    /// token.
    pub fn cancel_pending(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    pub fn apply_options(&self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        let mut config = self.config.read().clone();
        config.apply_options(src)?;
        *self.config.write() = config;
        self.config_id.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Build a request from this device to its host.
    pub fn request(&self, command: Command) -> Request {
        Request::new(self.host_id(), self.class, self.id, command)
    }

    /// Report an occurrence on this device.
    pub fn report(&self, occurrence: Occurrence) -> u64 {
        self.registry.report(occurrence)
    }

    pub fn report_code(&self, event_code: &str) -> u64 {
        self.registry.report_code(self.class, self.id, event_code)
    }

    pub fn registry(&self) -> &Arc<EventHandlerRegistry> {
        &self.registry
    }
}

// ───────────────────────────────────────────────────────────────
// Capability trait
// ───────────────────────────────────────────────────────────────

/// What every transaction device can do.
pub trait Device {
    fn core(&self) -> &DeviceCore;

    /// Event codes this device can raise.
    fn event_codes(&self) -> &'static [&'static str];

    fn class(&self) -> DeviceClass {
        self.core().class()
    }

    fn device_id(&self) -> i32 {
        self.core().id()
    }

    fn open(&self) {
        self.core().set_open(true);
    }

    fn close(&self) {
        self.core().set_open(false);
    }

    fn apply_options(&self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        self.core().apply_options(src)
    }

    /// Declare this device's events to the registry.
    fn register_events(&self) {
        let core = self.core();
        for code in self.event_codes() {
            core.registry().register_event(core.class(), core.id(), code);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Closed device set
// ───────────────────────────────────────────────────────────────

/// Every kind of device a host can own.
pub enum DeviceKind {
    Communications(HostComms),
    EventHandler(EventHandler),
    Handpay(HandpayDevice),
    Voucher(VoucherDevice),
    Progressive(ProgressiveDevice),
    IdReader(IdReaderDevice),
    Gat(GatDevice),
    Download(DownloadDevice),
}

impl DeviceKind {
    pub fn class(&self) -> DeviceClass {
        match self {
            Self::Communications(_) => DeviceClass::Communications,
            Self::EventHandler(_) => DeviceClass::EventHandler,
            Self::Handpay(d) => d.class(),
            Self::Voucher(d) => d.class(),
            Self::Progressive(d) => d.class(),
            Self::IdReader(d) => d.class(),
            Self::Gat(d) => d.class(),
            Self::Download(d) => d.class(),
        }
    }

    fn transaction_device(&self) -> Option<&dyn Device> {
        match self {
            Self::Communications(_) | Self::EventHandler(_) => None,
            Self::Handpay(d) => Some(d),
            Self::Voucher(d) => Some(d),
            Self::Progressive(d) => Some(d),
            Self::IdReader(d) => Some(d),
            Self::Gat(d) => Some(d),
            Self::Download(d) => Some(d),
        }
    }

    pub fn open(&self) {
        match self {
            Self::Communications(c) => c.open(),
            Self::EventHandler(h) => h.open(),
            other => {
                if let Some(device) = other.transaction_device() {
                    device.register_events();
                    device.open();
                }
            }
        }
    }

    pub fn close(&self) {
        match self {
            Self::Communications(c) => c.close(),
            Self::EventHandler(h) => h.close(),
            other => {
                if let Some(device) = other.transaction_device() {
                    device.close();
                }
            }
        }
    }

    pub fn apply_options(&self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        match self {
            Self::Communications(_) => Ok(()),
            Self::EventHandler(h) => h.apply_options(src),
            other => other
                .transaction_device()
                .map_or(Ok(()), |device| device.apply_options(src)),
        }
    }
}

/// The devices one host owns, opened in insertion order and closed in
/// reverse.
#[derive(Default)]
pub struct DeviceSet {
    devices: Vec<DeviceKind>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, device: DeviceKind) {
        self.devices.push(device);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceKind> {
        self.devices.iter()
    }

    pub fn open_all(&self) {
        for device in &self.devices {
            device.open();
        }
        info!("Opened {} device(s)", self.devices.len());
    }

    pub fn close_all(&self) {
        for device in self.devices.iter().rev() {
            device.close();
        }
        info!("Closed {} device(s)", self.devices.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::kv_store::KvEventStore;
    use crate::adapters::memory_kv::MemoryKv;
    use crate::adapters::sim_queue::SimHostQueue;
    use crate::app::ports::HostQueue;
    use crate::config::OPT_TIME_TO_LIVE;
    use std::collections::HashMap;

    fn core() -> (Arc<SimHostQueue>, DeviceCore) {
        let queue = Arc::new(SimHostQueue::new());
        let store = Arc::new(KvEventStore::open(Arc::new(MemoryKv::new())).unwrap());
        let registry = EventHandlerRegistry::new(store);
        let host = HostContext::new(1, queue.clone());
        let core = DeviceCore::new(
            DeviceClass::Handpay,
            3,
            host,
            &registry,
            DeviceConfig::default(),
        )
        .unwrap();
        (queue, core)
    }

    #[test]
    fn closed_device_cannot_send() {
        let (queue, core) = core();
        queue.enable_send(true);
        assert!(!core.can_send());
        core.set_open(true);
        assert!(core.can_send());
    }

    #[test]
    fn close_cancels_and_replaces_token() {
        let (_queue, core) = core();
        core.set_open(true);
        let first = core.retry_token();
        assert!(!first.is_cancelled());
        assert!(!core.retry_token().is_cancelled());

        core.set_open(false);
        assert!(first.is_cancelled());
        assert!(!core.retry_token().is_cancelled());
    }

    #[test]
    fn options_bump_config_id() {
        let (_queue, core) = core();
        let mut opts = HashMap::new();
        opts.insert(OPT_TIME_TO_LIVE.to_owned(), "1000".to_owned());
        core.apply_options(&opts).unwrap();
        assert_eq!(core.config_id(), 1);
        assert_eq!(core.time_to_live(), Duration::from_secs(1));

        opts.insert(OPT_TIME_TO_LIVE.to_owned(), "0".to_owned());
        assert!(core.apply_options(&opts).is_err());
        assert_eq!(core.config_id(), 1, "rejected options leave config alone");
    }

    #[test]
    fn requests_are_addressed_from_the_device() {
        let (_queue, core) = core();
        let r = core.request(Command::KeepAlive);
        assert_eq!((r.host_id, r.device_class, r.device_id), (1, DeviceClass::Handpay, 3));
    }
}
