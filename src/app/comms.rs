//! Per-host communications runtime.
//!
//! `HostComms` owns one host's state machine and executes the side effects
//! its entry actions request: transport bookkeeping, comms-class event
//! reports, and the handshake, sync, keep-alive, closing and reconnect
//! workers.
//!
//! ```text
//!   open()/close()/handle_command() ──▶ fire(trigger)
//!                                          │  fsm lock
//!                                          ▼
//!                            CommsFsm::fire ──▶ entry action ──▶ CommsContext.actions
//!                                          │
//!                                          ▼
//!                               execute(actions) ──▶ HostQueue / registry / timers
//!                                          │
//!             workers (handshake, sync, keep-alive, closing, reconnect)
//!                                          └──▶ fire(next trigger) on their own thread
//! ```
//!
//! Actions run with the state-machine lock held.  Anything that leads to
//! another trigger runs on a worker thread and fires once the current
//! transition has finished, so a transition never re-enters the machine.
//!
//! Lock order: fsm → transport → registry.  Session classification
//! (`SessionMonitor`) never takes the fsm lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use super::commands::HostCommand;
use super::events::CommsNotice;
use super::host::HostContext;
use super::ports::{CommsObserver, SessionMonitor};
use crate::cancel::CancellationToken;
use crate::config::CommsConfig;
use crate::error::Result;
use crate::event_handler::EventHandlerRegistry;
use crate::events::{COMMS_EVENTS, DeviceClass, G2S_CME101, G2S_CME120, G2S_CME121, G2S_CME122};
use crate::fsm::context::{CommsAction, CommsContext};
use crate::fsm::states::build_state_table;
use crate::fsm::{CommsFsm, CommsState, TransportState, Transition, Trigger};
use crate::message::{Command, OnlineFlags, Request, RequestError, Response, SessionState};
use crate::scheduler::Timer;
use crate::worker::spawn_detached;

// ───────────────────────────────────────────────────────────────
// Internal state
// ───────────────────────────────────────────────────────────────

struct FsmSlot {
    fsm: CommsFsm,
    ctx: CommsContext,
}

#[derive(Default)]
struct CommsTimers {
    sync: Option<Timer>,
    keep_alive: Option<Timer>,
    reconnect: Option<Timer>,
    /// Online announcement loop.
    handshake: Option<CancellationToken>,
}

impl CommsTimers {
    fn cancel_all(&mut self) {
        self.sync = None;
        self.keep_alive = None;
        self.reconnect = None;
        if let Some(token) = self.handshake.take() {
            token.cancel();
        }
    }
}

struct CommsInner {
    me: Weak<CommsInner>,
    host: HostContext,
    config: RwLock<CommsConfig>,
    /// Configuration adopted on the next pass through Closing.
    pending_config: Mutex<Option<CommsConfig>>,
    /// The owner wants the link up.
    open: AtomicBool,
    fsm: Mutex<FsmSlot>,
    timers: Mutex<CommsTimers>,
    transport: Mutex<TransportState>,
    observers: RwLock<Vec<Arc<dyn CommsObserver>>>,
    reporter: Arc<EventHandlerRegistry>,
    /// Flags for the next online announcement.
    startup: Mutex<OnlineFlags>,
    sync_interval: Mutex<Duration>,
}

// ───────────────────────────────────────────────────────────────
// Public handle
// ───────────────────────────────────────────────────────────────

/// The communications device for one host.
pub struct HostComms {
    inner: Arc<CommsInner>,
}

impl HostComms {
    /// Build the runtime for `host`.  The machine starts in `Closed`; call
    /// [`open`](Self::open) to start connecting.
    pub fn new(
        host: HostContext,
        config: CommsConfig,
        registry: &Arc<EventHandlerRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let fsm = CommsFsm::new(build_state_table(), CommsState::Closed)?;
        let host_id = host.host_id;
        let sync_interval = Duration::from_millis(config.default_sync_interval_ms.into());

        for code in COMMS_EVENTS {
            registry.register_event(DeviceClass::Communications, host_id, code);
        }

        let inner = Arc::new_cyclic(|me| CommsInner {
            me: me.clone(),
            host,
            config: RwLock::new(config),
            pending_config: Mutex::new(None),
            open: AtomicBool::new(false),
            fsm: Mutex::new(FsmSlot {
                fsm,
                ctx: CommsContext::new(host_id),
            }),
            timers: Mutex::new(CommsTimers::default()),
            transport: Mutex::new(TransportState::TransportDown),
            observers: RwLock::new(Vec::new()),
            reporter: Arc::clone(registry),
            startup: Mutex::new(OnlineFlags::cold_start()),
            sync_interval: Mutex::new(sync_interval),
        });

        let weak: Weak<CommsInner> = Arc::downgrade(&inner);
        let monitor: Weak<dyn SessionMonitor> = weak;
        inner.host.set_monitor(monitor);

        info!("COMMS[{}] created", host_id);
        Ok(Self { inner })
    }

    pub fn host_id(&self) -> i32 {
        self.inner.host.host_id
    }

    pub fn host(&self) -> &HostContext {
        &self.inner.host
    }

    pub fn add_observer(&self, observer: Arc<dyn CommsObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Mark the device open and start connecting.
    pub fn open(&self) {
        self.inner.open.store(true, Ordering::Release);
        self.inner.fire(Trigger::Enabled);
    }

    /// Mark the device closed and tear the link down.  No reconnect
    /// follows.
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::Release);
        self.inner.timers.lock().reconnect = None;
        self.inner.fire(Trigger::Close);
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CommsState {
        self.inner.fsm.lock().fsm.current_state()
    }

    pub fn transport_state(&self) -> TransportState {
        *self.inner.transport.lock()
    }

    pub fn config(&self) -> CommsConfig {
        self.inner.config.read().clone()
    }

    /// Sync interval adopted from the last online acknowledgement.
    pub fn sync_interval(&self) -> Duration {
        *self.inner.sync_interval.lock()
    }

    /// Fire a trigger directly.  Returns the transition taken, if any.
    pub fn fire(&self, trigger: Trigger) -> Option<Transition> {
        self.inner.fire(trigger)
    }

    /// Apply an inbound host command.
    pub fn handle_command(&self, command: HostCommand) -> Option<Transition> {
        match command {
            HostCommand::SetCommsState { enable: true } => self.inner.fire(Trigger::HostEnabled),
            HostCommand::SetCommsState { enable: false } => self.inner.fire(Trigger::HostDisabled),
            HostCommand::ConfigChanged(config) => {
                if let Err(e) = config.validate() {
                    warn!("COMMS[{}] config change rejected: {}", self.host_id(), e);
                    return None;
                }
                *self.inner.pending_config.lock() = Some(config);
                self.inner.fire(Trigger::ConfigChange)
            }
            HostCommand::Close => self.inner.fire(Trigger::Close),
        }
    }

    /// Turn the transport's overflow flags into triggers.
    pub fn poll_queue_overflow(&self) -> Option<Transition> {
        self.inner.poll_queue_overflow()
    }

    /// Record what changed since the last announcement.
    pub fn note_startup(&self, flags: OnlineFlags) {
        self.inner.startup.lock().merge(flags);
    }

    pub fn startup_flags(&self) -> OnlineFlags {
        *self.inner.startup.lock()
    }

    /// Both idle times exceed the no-response timer.
    pub fn host_unresponsive(&self) -> bool {
        self.inner.host_unresponsive()
    }
}

impl Drop for HostComms {
    fn drop(&mut self) {
        self.inner.open.store(false, Ordering::Release);
        self.inner.timers.lock().cancel_all();
    }
}

// ───────────────────────────────────────────────────────────────
// Runtime
// ───────────────────────────────────────────────────────────────

impl CommsInner {
    fn host_id(&self) -> i32 {
        self.host.host_id
    }

    fn fire(self: &Arc<Self>, trigger: Trigger) -> Option<Transition> {
        let mut slot = self.fsm.lock();
        let FsmSlot { fsm, ctx } = &mut *slot;
        ctx.device_open = self.open.load(Ordering::Acquire);
        if trigger == Trigger::ConfigChange && fsm.target(trigger).is_some() {
            ctx.config_change_pending = true;
        }

        let transition = fsm.fire(trigger, ctx)?;
        self.host.status.set_comms_state(transition.to);
        self.notify(&CommsNotice::StateChanged {
            host_id: self.host_id(),
            from: transition.from,
            to: transition.to,
            trigger,
        });
        for action in ctx.take_actions() {
            self.execute(action);
        }
        Some(transition)
    }

    /// Fire on a worker thread, after the caller has released its locks.
    fn fire_later(self: &Arc<Self>, trigger: Trigger) {
        let weak = Arc::downgrade(self);
        spawn_detached(
            format!("comms-fire-{}", self.host_id()),
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire(trigger);
                }
            },
        );
    }

    fn notify(&self, notice: &CommsNotice) {
        for observer in self.observers.read().iter() {
            observer.notify(notice);
        }
    }

    fn execute(self: &Arc<Self>, action: CommsAction) {
        debug!("COMMS[{}] action {:?}", self.host_id(), action);
        match action {
            CommsAction::CancelTimers => self.timers.lock().cancel_all(),
            CommsAction::SetTransport(state) => self.set_transport(state),
            CommsAction::EnableSend(enable) => self.host.queue.enable_send(enable),
            CommsAction::SetEgmEnabled(enabled) => self.host.status.set_egm_enabled(enabled),
            CommsAction::SetHostEnabled(enabled) => self.host.status.set_host_enabled(enabled),
            CommsAction::Report(code) => {
                self.reporter
                    .report_code(DeviceClass::Communications, self.host_id(), code);
            }
            CommsAction::ScheduleReconnect => self.schedule_reconnect(),
            CommsAction::BeginOnlineHandshake => self.begin_online_handshake(),
            CommsAction::ClearStartupContext => *self.startup.lock() = OnlineFlags::default(),
            CommsAction::StartSyncHandshake => self.start_sync_handshake(),
            CommsAction::SetQueueOnline => self.host.queue.set_online(),
            CommsAction::StartKeepAlive => self.start_keep_alive(),
            CommsAction::FlushConfigChange => self.flush_config_change(),
            CommsAction::SendClosing => self.send_closing(),
        }
    }

    // ── Transport ─────────────────────────────────────────────

    fn set_transport(self: &Arc<Self>, state: TransportState) {
        let mut current = self.transport.lock();
        if *current == state {
            return;
        }
        let from = *current;
        *current = state;
        self.host.status.set_transport(state);
        info!(
            "COMMS[{}] transport: {:?} -> {:?}",
            self.host_id(),
            from,
            state
        );
        self.notify(&CommsNotice::TransportChanged {
            host_id: self.host_id(),
            from,
            to: state,
        });
        let code = match state {
            TransportState::TransportUp => G2S_CME120,
            TransportState::TransportDown => G2S_CME121,
            TransportState::HostUnreachable => G2S_CME122,
        };
        self.reporter
            .report_code(DeviceClass::Communications, self.host_id(), code);
        drop(current);

        if state == TransportState::HostUnreachable {
            self.fire_later(Trigger::Error);
        }
    }

    fn host_unresponsive(&self) -> bool {
        let limit = self.config.read().no_response_timer();
        self.host.queue.sent_elapsed() > limit && self.host.queue.received_elapsed() > limit
    }

    // ── Workers ───────────────────────────────────────────────

    fn schedule_reconnect(self: &Arc<Self>) {
        let delay = self.config.read().reconnect_delay();
        let weak = Arc::downgrade(self);
        match Timer::once(
            format!("comms-reconnect-{}", self.host_id()),
            delay,
            move || {
                if let Some(inner) = weak.upgrade() {
                    if inner.open.load(Ordering::Acquire) {
                        inner.fire(Trigger::Enabled);
                    }
                }
            },
        ) {
            Ok(timer) => {
                debug!("COMMS[{}] reconnect in {:?}", self.host_id(), delay);
                self.timers.lock().reconnect = Some(timer);
            }
            Err(e) => error!("COMMS[{}] reconnect timer failed: {}", self.host_id(), e),
        }
    }

    fn begin_online_handshake(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(old) = self.timers.lock().handshake.replace(token.clone()) {
            old.cancel();
        }
        let weak = Arc::downgrade(self);
        spawn_detached(format!("comms-online-{}", self.host_id()), move || {
            online_handshake_loop(&weak, &token);
        });
    }

    fn start_sync_handshake(self: &Arc<Self>) {
        let interval = {
            let config = self.config.read();
            (*self.sync_interval.lock()).max(config.min_sync_interval())
        };
        let weak = Arc::downgrade(self);
        match Timer::every(
            format!("comms-sync-{}", self.host_id()),
            interval,
            true,
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.exchange(Command::CommsDisabled);
                    inner.poll_queue_overflow();
                }
            },
        ) {
            Ok(timer) => self.timers.lock().sync = Some(timer),
            Err(e) => error!("COMMS[{}] sync timer failed: {}", self.host_id(), e),
        }
    }

    fn start_keep_alive(self: &Arc<Self>) {
        let Some(interval) = self.config.read().keep_alive() else {
            debug!("COMMS[{}] keep-alive disabled", self.host_id());
            return;
        };
        let weak = Arc::downgrade(self);
        match Timer::every(
            format!("comms-keepalive-{}", self.host_id()),
            interval,
            false,
            move || {
                if let Some(inner) = weak.upgrade() {
                    let queue = &inner.host.queue;
                    if queue.sent_elapsed() > interval && queue.received_elapsed() > interval {
                        inner.exchange(Command::KeepAlive);
                    }
                    inner.poll_queue_overflow();
                }
            },
        ) {
            Ok(timer) => self.timers.lock().keep_alive = Some(timer),
            Err(e) => error!("COMMS[{}] keep-alive timer failed: {}", self.host_id(), e),
        }
    }

    fn flush_config_change(&self) {
        if let Some(config) = self.pending_config.lock().take() {
            info!("COMMS[{}] adopting new configuration", self.host_id());
            self.host.queue.set_session_timeout(config.time_to_live());
            *self.config.write() = config;
        }
    }

    fn send_closing(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        spawn_detached(format!("comms-closing-{}", self.host_id()), move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let wait = inner.config.read().closing_wait();
            let state = inner.send_comms(Command::CommsClosing, wait).0;
            debug!(
                "COMMS[{}] commsClosing finished {:?}",
                inner.host_id(),
                state
            );
            inner.fire(Trigger::Disabled);
        });
    }

    /// Send a comms-class request and wait up to `wait`.
    fn send_comms(&self, command: Command, wait: Duration) -> (SessionState, Vec<Response>) {
        let request = Request::new(
            self.host_id(),
            DeviceClass::Communications,
            self.host_id(),
            command,
        );
        let mut session = self.host.queue.send(request, Some(wait));
        let state = session.wait_for_completion(Some(wait));
        self.classify(state, session.request_error());
        (state, session.responses().to_vec())
    }

    /// One request/response exchange bounded by the time-to-live.
    fn exchange(self: &Arc<Self>, command: Command) -> SessionState {
        let ttl = self.config.read().time_to_live();
        self.send_comms(command, ttl).0
    }

    fn poll_queue_overflow(self: &Arc<Self>) -> Option<Transition> {
        let queue = &self.host.queue;
        if queue.inbound_queue_full() {
            self.fire(Trigger::InboundOverflow)
        } else if queue.outbound_queue_full() {
            self.fire(Trigger::OutboundOverflow)
        } else if self.host.status.comms_state() == CommsState::Overflow {
            self.fire(Trigger::OutboundOverflowCleared)
        } else {
            None
        }
    }

    /// Fold one session outcome into transport state and, for host
    /// unavailability, the comms state.
    fn classify(&self, state: SessionState, error: Option<&RequestError>) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        match state {
            SessionState::Success => this.set_transport(TransportState::TransportUp),
            SessionState::CommsLost => {
                if this.host_unresponsive() {
                    warn!("COMMS[{}] host unresponsive", this.host_id());
                    this.set_transport(TransportState::HostUnreachable);
                }
            }
            SessionState::RequestError => {
                let unavailable = error.is_some_and(RequestError::is_host_unavailable);
                if unavailable && this.host.status.comms_state() != CommsState::Opening {
                    warn!("COMMS[{}] host unavailable, closing", this.host_id());
                    this.reporter
                        .report_code(DeviceClass::Communications, this.host_id(), G2S_CME101);
                    this.fire_later(Trigger::Error);
                }
            }
            SessionState::Pending | SessionState::TimedOut | SessionState::ResponseError => {}
        }
    }
}

impl SessionMonitor for CommsInner {
    fn session_completed(&self, state: SessionState, error: Option<&RequestError>) {
        self.classify(state, error);
    }
}

/// Announce the EGM until the host answers or the loop is cancelled.
fn online_handshake_loop(weak: &Weak<CommsInner>, token: &CancellationToken) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if token.is_cancelled() || !inner.open.load(Ordering::Acquire) {
            return;
        }
        let config = inner.config.read().clone();
        let flags = *inner.startup.lock();
        let (state, responses) = inner.send_comms(
            Command::CommsOnLine {
                egm_type: config.egm_type.clone(),
                egm_location: config.egm_location.clone(),
                flags,
            },
            config.time_to_live(),
        );

        let retry_in = match state {
            SessionState::Success => {
                let offered = responses.iter().find_map(|r| match r {
                    Response::CommsOnLineAck { sync_timer_ms } => {
                        Some(Duration::from_millis((*sync_timer_ms).into()))
                    }
                    _ => None,
                });
                let interval = config.adopt_sync_interval(offered.unwrap_or_default());
                *inner.sync_interval.lock() = interval;
                info!(
                    "COMMS[{}] online acknowledged, sync every {:?}",
                    inner.host_id(),
                    interval
                );
                if !token.is_cancelled() {
                    inner.fire(Trigger::Established);
                }
                return;
            }
            SessionState::TimedOut => config.timeout_retry(),
            _ => config.default_comms_interval(),
        };
        debug!(
            "COMMS[{}] commsOnLine {:?}, retry in {:?}",
            inner.host_id(),
            state,
            retry_in
        );
        drop(inner);
        if token.wait_timeout(retry_in) {
            return;
        }
    }
}
