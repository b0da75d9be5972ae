//! Per-host shared handles.
//!
//! Every device owned by a host holds a [`HostContext`]: the host id, the
//! host's transport queue and the [`HostStatus`] flags the comms runtime
//! publishes.  The event handler reads `host_enabled` from here to gate
//! delivery; device retry helpers report their session outcomes through
//! the registered [`SessionMonitor`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::ports::{HostQueue, SessionMonitor};
use crate::fsm::{CommsState, TransportState};
use crate::message::{RequestError, SessionState};

/// Status flags published by the comms runtime, read by everyone else.
#[derive(Debug)]
pub struct HostStatus {
    comms_state: AtomicU8,
    transport: AtomicU8,
    egm_enabled: AtomicBool,
    host_enabled: AtomicBool,
}

impl Default for HostStatus {
    fn default() -> Self {
        Self {
            comms_state: AtomicU8::new(CommsState::Closed as u8),
            transport: AtomicU8::new(TransportState::TransportDown as u8),
            egm_enabled: AtomicBool::new(false),
            host_enabled: AtomicBool::new(false),
        }
    }
}

impl HostStatus {
    pub fn comms_state(&self) -> CommsState {
        CommsState::try_from(self.comms_state.load(Ordering::Acquire)).unwrap_or(CommsState::Closed)
    }

    pub fn set_comms_state(&self, state: CommsState) {
        self.comms_state.store(state as u8, Ordering::Release);
    }

    pub fn transport(&self) -> TransportState {
        TransportState::from_u8(self.transport.load(Ordering::Acquire))
            .unwrap_or(TransportState::TransportDown)
    }

    pub fn set_transport(&self, state: TransportState) {
        self.transport.store(state as u8, Ordering::Release);
    }

    pub fn egm_enabled(&self) -> bool {
        self.egm_enabled.load(Ordering::Acquire)
    }

    pub fn set_egm_enabled(&self, enabled: bool) {
        self.egm_enabled.store(enabled, Ordering::Release);
    }

    pub fn host_enabled(&self) -> bool {
        self.host_enabled.load(Ordering::Acquire)
    }

    pub fn set_host_enabled(&self, enabled: bool) {
        self.host_enabled.store(enabled, Ordering::Release);
    }
}

/// Handles shared by every device a host owns.
#[derive(Clone)]
pub struct HostContext {
    pub host_id: i32,
    pub queue: Arc<dyn HostQueue>,
    pub status: Arc<HostStatus>,
    monitor: Arc<RwLock<Option<Weak<dyn SessionMonitor>>>>,
}

impl HostContext {
    pub fn new(host_id: i32, queue: Arc<dyn HostQueue>) -> Self {
        Self {
            host_id,
            queue,
            status: Arc::new(HostStatus::default()),
            monitor: Arc::new(RwLock::new(None)),
        }
    }

    /// Route session outcomes on this host to `monitor`.
    pub fn set_monitor(&self, monitor: Weak<dyn SessionMonitor>) {
        *self.monitor.write() = Some(monitor);
    }

    /// Report a completed session to the host's monitor, if one is alive.
    pub fn session_completed(&self, state: SessionState, error: Option<&RequestError>) {
        let monitor = self.monitor.read().as_ref().and_then(Weak::upgrade);
        if let Some(monitor) = monitor {
            monitor.session_completed(state, error);
        }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("host_id", &self.host_id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
