//! GAT device: push component verification results to the host.
//!
//! Results are pushed from a worker thread so the verifier never blocks
//! on the host.  Closing the device cancels any push still retrying.

use std::sync::Arc;

use log::{info, warn};

use crate::app::host::HostContext;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceCore};
use crate::error::ConfigError;
use crate::event_handler::{EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Response};
use crate::retry::{RetryPolicy, request_with_retry, spawn_retry_chain};

/// Verification complete.
pub const G2S_GAE102: &str = "G2S_GAE102";

const EVENTS: &[&str] = &[G2S_GAE102];

pub struct GatDevice {
    core: Arc<DeviceCore>,
}

impl GatDevice {
    pub fn new(
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: Arc::new(DeviceCore::new(DeviceClass::Gat, id, host, registry, config)?),
        })
    }

    /// Start pushing one verification result.  Returns whether the push
    /// thread started.
    pub fn push_verification_result(
        &self,
        transaction_id: u64,
        verification_id: u64,
        component_id: &str,
        passed: bool,
    ) -> bool {
        let core = Arc::clone(&self.core);
        let component_id = component_id.to_owned();
        let name = format!("gat-{}-{}", core.host_id(), transaction_id);
        spawn_retry_chain(name, move || {
            let policy = RetryPolicy::for_transaction(core.time_to_live());
            let outcome = request_with_retry(
                &core,
                &policy,
                || {
                    core.request(Command::VerificationResult {
                        transaction_id,
                        verification_id,
                        component_id: component_id.clone(),
                        passed,
                    })
                },
                |responses| {
                    responses
                        .iter()
                        .any(|r| matches!(r, Response::VerificationResultAck { transaction_id: t } if *t == transaction_id))
                        .then_some(())
                },
            );
            if outcome.is_completed() {
                info!(
                    "GAT[{}] verification {} for {} acknowledged",
                    core.id(),
                    verification_id,
                    component_id
                );
                core.report(
                    Occurrence::new(DeviceClass::Gat, core.id(), G2S_GAE102)
                        .with_transaction(transaction_id, Vec::new()),
                );
            } else {
                warn!(
                    "GAT[{}] verification {} push ended {:?}",
                    core.id(),
                    verification_id,
                    outcome
                );
            }
        })
    }
}

impl Device for GatDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn event_codes(&self) -> &'static [&'static str] {
        EVENTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim_queue::SimReply;
    use crate::devices::testkit;
    use crate::message::SessionState;
    use std::time::{Duration, Instant};

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let until = Instant::now() + Duration::from_secs(2);
        while Instant::now() < until {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn push_is_delivered_in_background() {
        let (queue, host, registry) = testkit::host();
        let d = GatDevice::new(1, host, &registry, DeviceConfig::default()).unwrap();
        d.open();
        assert!(d.push_verification_result(4, 17, "os", true));
        assert!(wait_for(|| queue.sent_commands() == vec!["verificationResult"]));
    }

    #[test]
    fn close_cancels_retrying_push() {
        let (queue, host, registry) = testkit::host();
        let d = GatDevice::new(1, host, &registry, DeviceConfig::default()).unwrap();
        d.open();
        queue.set_timeout_latency(Duration::from_millis(20));
        queue.set_responder(|_| SimReply::Fail(SessionState::TimedOut));
        assert!(d.push_verification_result(4, 17, "os", true));
        assert!(wait_for(|| !queue.sent().is_empty()));

        d.close();
        std::thread::sleep(Duration::from_millis(60));
        let after_close = queue.sent().len();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(queue.sent().len(), after_close, "no sends after close");
    }
}
