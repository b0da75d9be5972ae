//! Outbound status notices.
//!
//! [`HostComms`](super::comms::HostComms) emits these through the
//! [`CommsObserver`](super::ports::CommsObserver) port on every state
//! machine transition and every transport state change.

use crate::fsm::{CommsState, TransportState, Trigger};

/// Structured notices emitted by the comms runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsNotice {
    /// The state machine took a transition.
    StateChanged {
        host_id: i32,
        from: CommsState,
        to: CommsState,
        trigger: Trigger,
    },

    /// Transport health changed.
    TransportChanged {
        host_id: i32,
        from: TransportState,
        to: TransportState,
    },
}

impl CommsNotice {
    pub fn host_id(&self) -> i32 {
        match self {
            Self::StateChanged { host_id, .. } | Self::TransportChanged { host_id, .. } => *host_id,
        }
    }
}
