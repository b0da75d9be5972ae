//! Shared mutable context threaded through every state action.
//!
//! `CommsContext` is the blackboard the entry and exit actions write to.
//! Actions never talk to the transport directly: they append
//! [`CommsAction`]s here, and the [`HostComms`](crate::app::comms::HostComms)
//! runtime drains and executes them in order after the transition.

use super::TransportState;

// ---------------------------------------------------------------------------
// Actions (written by state handlers; executed by the runtime)
// ---------------------------------------------------------------------------

/// Side effects requested by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsAction {
    /// Cancel every comms timer and the pending handshake loop.
    CancelTimers,
    SetTransport(TransportState),
    EnableSend(bool),
    SetEgmEnabled(bool),
    SetHostEnabled(bool),
    /// Report a communications-class event.
    Report(&'static str),
    /// Re-fire `Enabled` after the reconnect delay.
    ScheduleReconnect,
    /// Start the online announcement loop.
    BeginOnlineHandshake,
    ClearStartupContext,
    /// Send `commsDisabled` now and repeat it at the sync interval.
    StartSyncHandshake,
    SetQueueOnline,
    StartKeepAlive,
    /// Adopt any pending configuration and report the change.
    FlushConfigChange,
    /// Send `commsClosing`, then fire `Disabled`.
    SendClosing,
}

// ---------------------------------------------------------------------------
// CommsContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CommsContext {
    pub host_id: i32,
    /// The device is logically open (the owner wants the link up).
    pub device_open: bool,
    /// Configuration change waiting to be adopted on the way through Closing.
    pub config_change_pending: bool,
    /// Side effects queued by the last transition.
    pub actions: Vec<CommsAction>,
}

impl CommsContext {
    pub fn new(host_id: i32) -> Self {
        Self {
            host_id,
            device_open: false,
            config_change_pending: false,
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: CommsAction) {
        self.actions.push(action);
    }

    /// Take every queued action, leaving the list empty.
    pub fn take_actions(&mut self) -> Vec<CommsAction> {
        std::mem::take(&mut self.actions)
    }
}
