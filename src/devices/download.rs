//! Download device: report package status changes to the host.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::app::host::HostContext;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceCore};
use crate::error::ConfigError;
use crate::event_handler::{EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Response};
use crate::retry::{RetryPolicy, request_with_retry, spawn_retry_chain};

/// Package status changed.
pub const G2S_DLE101: &str = "G2S_DLE101";

const EVENTS: &[&str] = &[G2S_DLE101];

const STATUS_FAILURE_DELAY: Duration = Duration::from_secs(1);

pub struct DownloadDevice {
    core: Arc<DeviceCore>,
}

impl DownloadDevice {
    pub fn new(
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: Arc::new(DeviceCore::new(DeviceClass::Download, id, host, registry, config)?),
        })
    }

    /// Push a package status on a worker thread.
    pub fn push_status(&self, transaction_id: u64, package_id: &str, status: &str) -> bool {
        let core = Arc::clone(&self.core);
        let package_id = package_id.to_owned();
        let status = status.to_owned();
        let name = format!("dl-{}-{}", core.host_id(), transaction_id);
        spawn_retry_chain(name, move || {
            core.report(
                Occurrence::new(DeviceClass::Download, core.id(), G2S_DLE101)
                    .with_text(format!("{package_id}: {status}"))
                    .with_transaction(transaction_id, Vec::new()),
            );
            let policy = RetryPolicy::for_transaction(core.time_to_live())
                .with_failure_delay(STATUS_FAILURE_DELAY);
            let outcome = request_with_retry(
                &core,
                &policy,
                || {
                    core.request(Command::DownloadStatus {
                        transaction_id,
                        package_id: package_id.clone(),
                        status: status.clone(),
                    })
                },
                |responses| {
                    responses
                        .iter()
                        .any(|r| matches!(r, Response::DownloadStatusAck { transaction_id: t } if *t == transaction_id))
                        .then_some(())
                },
            );
            if outcome.is_completed() {
                debug!("DOWNLOAD[{}] {} -> {} acknowledged", core.id(), package_id, status);
            } else {
                warn!("DOWNLOAD[{}] {} status push ended {:?}", core.id(), package_id, outcome);
            }
        })
    }
}

impl Device for DownloadDevice {
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
    use std::time::Instant;

    #[test]
    fn status_is_retried_until_acknowledged() {
        let (queue, host, registry) = testkit::host();
        let d = DownloadDevice::new(1, host, &registry, DeviceConfig::default()).unwrap();
        d.open();
        queue.push_reply(SimReply::Fail(SessionState::ResponseError));
        assert!(d.push_status(6, "pkg-1", "G2S_transferComplete"));

        let until = Instant::now() + Duration::from_secs(3);
        while queue.sent().len() < 2 && Instant::now() < until {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(queue.sent_commands(), vec!["downloadStatus", "downloadStatus"]);
    }
}
