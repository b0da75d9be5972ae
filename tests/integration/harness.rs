//! Shared fixtures: a fast-timing host link and polling helpers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use g2slink::adapters::kv_store::KvEventStore;
use g2slink::adapters::memory_kv::MemoryKv;
use g2slink::adapters::sim_queue::SimHostQueue;
use g2slink::app::comms::HostComms;
use g2slink::app::events::CommsNotice;
use g2slink::app::host::HostContext;
use g2slink::app::ports::{CommsObserver, EventStore, HostQueue};
use g2slink::config::{CommsConfig, DeviceConfig, EventHandlerConfig};
use g2slink::event_handler::{EventHandler, EventHandlerRegistry};
use g2slink::fsm::{CommsState, TransportState};

pub const HOST: i32 = 1;

/// Records every notice it sees.
#[derive(Default)]
pub struct RecordingObserver {
    notices: Mutex<Vec<CommsNotice>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn notices(&self) -> Vec<CommsNotice> {
        self.notices.lock().clone()
    }

    /// States entered, in order.
    pub fn states(&self) -> Vec<CommsState> {
        self.notices
            .lock()
            .iter()
            .filter_map(|n| match n {
                CommsNotice::StateChanged { to, .. } => Some(*to),
                CommsNotice::TransportChanged { .. } => None,
            })
            .collect()
    }

    pub fn transports(&self) -> Vec<TransportState> {
        self.notices
            .lock()
            .iter()
            .filter_map(|n| match n {
                CommsNotice::TransportChanged { to, .. } => Some(*to),
                CommsNotice::StateChanged { .. } => None,
            })
            .collect()
    }
}

impl CommsObserver for RecordingObserver {
    fn notify(&self, notice: &CommsNotice) {
        self.notices.lock().push(*notice);
    }
}

/// Poll `f` every few milliseconds until it holds or two seconds pass.
pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + Duration::from_secs(2);
    while Instant::now() < until {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    f()
}

pub fn fast_comms() -> CommsConfig {
    CommsConfig {
        host_id: HOST,
        time_to_live_ms: 200,
        no_response_timer_ms: 1_000,
        keep_alive_ms: 0,
        default_comms_interval_ms: 50,
        timeout_retry_ms: 20,
        default_sync_interval_ms: 5_000,
        min_sync_interval_ms: 5_000,
        reconnect_delay_ms: 50,
        closing_wait_ms: 50,
        ..CommsConfig::default()
    }
}

pub fn fast_events(capacity: usize) -> EventHandlerConfig {
    EventHandlerConfig {
        time_to_live_ms: 50,
        min_log_entries: capacity,
        poll_interval_ms: 10,
        ..EventHandlerConfig::default()
    }
}

pub fn fast_device() -> DeviceConfig {
    DeviceConfig {
        time_to_live_ms: 100,
    }
}

/// One host wired to a simulated queue and an in-memory event store.
pub struct Link {
    pub queue: Arc<SimHostQueue>,
    pub kv: Arc<MemoryKv>,
    pub store: Arc<KvEventStore>,
    pub registry: Arc<EventHandlerRegistry>,
    pub host: HostContext,
}

#[allow(dead_code)]
impl Link {
    pub fn new() -> Self {
        Self::over(Arc::new(MemoryKv::new()))
    }

    /// A fresh link over an existing key/value store (simulated restart).
    pub fn over(kv: Arc<MemoryKv>) -> Self {
        let queue = Arc::new(SimHostQueue::new());
        let store = Arc::new(KvEventStore::open(kv.clone()).unwrap());
        let registry = EventHandlerRegistry::new(store.clone() as Arc<dyn EventStore>);
        let host = HostContext::new(HOST, queue.clone() as Arc<dyn HostQueue>);
        Self {
            queue,
            kv,
            store,
            registry,
            host,
        }
    }

    pub fn comms(&self) -> (HostComms, Arc<RecordingObserver>) {
        self.comms_with(fast_comms())
    }

    pub fn comms_with(&self, config: CommsConfig) -> (HostComms, Arc<RecordingObserver>) {
        let comms = HostComms::new(self.host.clone(), config, &self.registry).unwrap();
        let observer = Arc::new(RecordingObserver::default());
        comms.add_observer(observer.clone());
        (comms, observer)
    }

    pub fn handler(&self, capacity: usize) -> EventHandler {
        EventHandler::new(self.host.clone(), fast_events(capacity), &self.registry).unwrap()
    }

    /// Open comms and drive it to Online.
    pub fn online(&self, comms: &HostComms) {
        comms.open();
        assert!(wait_until(|| comms.state() == CommsState::Sync), "never reached Sync");
        comms.fire(g2slink::fsm::Trigger::HostEnabled);
        assert_eq!(comms.state(), CommsState::Online);
    }

    /// Make the host accept traffic without running the comms machine.
    pub fn host_enabled(&self) {
        self.queue.enable_send(true);
        self.host.status.set_host_enabled(true);
    }
}
