//! Log-based comms observer.
//!
//! Implements [`CommsObserver`] by writing every [`CommsNotice`] to the
//! `log` facade.  A telemetry or UI adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::CommsNotice;
use crate::app::ports::CommsObserver;
use crate::fsm::TransportState;

/// Adapter that logs every [`CommsNotice`].
#[derive(Debug, Default)]
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl CommsObserver for LogObserver {
    fn notify(&self, notice: &CommsNotice) {
        match notice {
            CommsNotice::StateChanged {
                host_id,
                from,
                to,
                trigger,
            } => {
                info!("HOST[{}] | comms {} -> {} ({})", host_id, from, to, trigger);
            }
            CommsNotice::TransportChanged { host_id, from, to } => {
                if *to == TransportState::HostUnreachable {
                    warn!("HOST[{}] | transport {:?} -> {:?}", host_id, from, to);
                } else {
                    info!("HOST[{}] | transport {:?} -> {:?}", host_id, from, to);
                }
            }
        }
    }
}
