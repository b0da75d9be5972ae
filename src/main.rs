//! g2slink simulator: one host link driven end to end in-process.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  SimHostQueue      KvEventStore      LogObserver             │
//! │  (HostQueue)       (EventStore)      (CommsObserver)         │
//! │                    over MemoryKv                             │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  HostComms (FSM)  ·  EventHandler  ·  HandpayDevice    │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `g2slink-sim [config.json]`.  Set `RUST_LOG=debug` for the full
//! trace.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{info, warn};

use g2slink::adapters::kv_store::KvEventStore;
use g2slink::adapters::log_sink::LogObserver;
use g2slink::adapters::memory_kv::MemoryKv;
use g2slink::adapters::sim_queue::SimHostQueue;
use g2slink::app::commands::HostCommand;
use g2slink::app::comms::HostComms;
use g2slink::app::host::HostContext;
use g2slink::config::LinkConfig;
use g2slink::device::{DeviceKind, DeviceSet};
use g2slink::devices::HandpayDevice;
use g2slink::event_handler::{EventHandler, EventHandlerRegistry, EventSubscription};
use g2slink::events::ALL_DEVICES;
use g2slink::fsm::CommsState;

const ONLINE_WAIT: Duration = Duration::from_secs(5);
const DRAIN_WAIT: Duration = Duration::from_secs(2);

fn load_config() -> Result<LinkConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            let config = LinkConfig::from_json(&text)
                .with_context(|| format!("parsing config file {path}"))?;
            info!("Config loaded from {}", path);
            Ok(config)
        }
        None => {
            info!("No config file given, using defaults");
            Ok(LinkConfig::default())
        }
    }
}

fn wait_for(what: &str, limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + limit;
    while Instant::now() < until {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    warn!("Gave up waiting for {}", what);
    false
}

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  g2slink-sim v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Config ─────────────────────────────────────────────
    let config = load_config()?;
    let host_id = config.comms.host_id;

    // ── 3. Adapters ───────────────────────────────────────────
    let queue = Arc::new(SimHostQueue::new());
    let store = Arc::new(KvEventStore::open(Arc::new(MemoryKv::new()))?);
    let registry = EventHandlerRegistry::new(store);
    let host = HostContext::new(host_id, queue.clone());

    // ── 4. Devices ────────────────────────────────────────────
    let comms = HostComms::new(host.clone(), config.comms.clone(), &registry)?;
    comms.add_observer(Arc::new(LogObserver::new()));

    let handler = EventHandler::new(host.clone(), config.event_handler.clone(), &registry)?;
    handler.set_event_subscriptions(&[EventSubscription {
        event_persist: true,
        ..EventSubscription::new("G2S_JPE101", ALL_DEVICES)
    }]);
    for code in ["G2S_CME120", "G2S_CME003"] {
        handler.set_event_subscriptions(&[EventSubscription::new(code, ALL_DEVICES)]);
    }

    let handpay = HandpayDevice::new(1, host, &registry, config.device.clone())?;

    let mut devices = DeviceSet::new();
    devices.push(DeviceKind::Communications(comms));
    devices.push(DeviceKind::EventHandler(handler));
    devices.push(DeviceKind::Handpay(handpay));
    devices.open_all();

    // ── 5. Drive the host online ──────────────────────────────
    let Some(DeviceKind::Communications(comms)) = devices.iter().next() else {
        anyhow::bail!("device set lost its communications device");
    };
    if !wait_for("Sync", ONLINE_WAIT, || comms.state() == CommsState::Sync) {
        anyhow::bail!("host {} never acknowledged commsOnLine", host_id);
    }
    comms.handle_command(HostCommand::SetCommsState { enable: true });
    if !wait_for("Online", ONLINE_WAIT, || comms.state() == CommsState::Online) {
        anyhow::bail!("host {} never came online (state {:?})", host_id, comms.state());
    }
    info!("Host {} online, sync interval {:?}", host_id, comms.sync_interval());

    // ── 6. Traffic ────────────────────────────────────────────
    for device in devices.iter() {
        if let DeviceKind::Handpay(handpay) = device {
            for (tx, amount) in [(1_u64, 120_000_i64), (2, 250_000)] {
                let ok = handpay.request(tx, amount);
                info!("Handpay #{} for {}: {}", tx, amount, if ok { "acknowledged" } else { "failed" });
            }
        }
    }
    wait_for("event delivery", DRAIN_WAIT, || {
        devices.iter().all(|d| match d {
            DeviceKind::EventHandler(h) => h.queue_len() == 0,
            _ => true,
        })
    });

    for (event_id, code) in queue.event_reports() {
        info!("Delivered event {} {}", event_id, code);
    }
    info!(
        "{} request(s), {} notification(s) sent to host {}",
        queue.sent().len(),
        queue.notifications().len(),
        host_id
    );
    // ── 7. Shutdown ───────────────────────────────────────────
    devices.close_all();
    Ok(())
}
