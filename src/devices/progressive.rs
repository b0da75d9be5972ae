//! Progressive device: hit notification with an offline fallback, then commit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::app::host::HostContext;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceCore};
use crate::error::ConfigError;
use crate::event_handler::{EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Response};
use crate::retry::{RetryOutcome, RetryPolicy, request_with_retry};

/// Progressive level hit.
pub const G2S_PGE101: &str = "G2S_PGE101";
/// Progressive award committed.
pub const G2S_PGE102: &str = "G2S_PGE102";

const EVENTS: &[&str] = &[G2S_PGE101, G2S_PGE102];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardSource {
    /// The host set the win amount.
    Host,
    /// The host could not be reached in time; the hit amount stands.
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressiveAward {
    pub amount: i64,
    pub source: AwardSource,
}

pub struct ProgressiveDevice {
    core: DeviceCore,
}

impl ProgressiveDevice {
    pub fn new(
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: DeviceCore::new(DeviceClass::Progressive, id, host, registry, config)?,
        })
    }

    /// Report a level hit and wait up to `deadline` for the host to set
    /// the win.  Returns `None` only when the device closed mid-chain.
    pub fn hit(
        &self,
        transaction_id: u64,
        progressive_id: i32,
        level_id: i32,
        amount: i64,
        deadline: Duration,
    ) -> Option<ProgressiveAward> {
        let core = &self.core;
        core.report(
            Occurrence::new(DeviceClass::Progressive, core.id(), G2S_PGE101)
                .with_transaction(transaction_id, Vec::new()),
        );
        let policy = RetryPolicy::for_transaction(core.time_to_live())
            .with_deadline(Instant::now() + deadline);
        let outcome = request_with_retry(
            core,
            &policy,
            || {
                core.request(Command::ProgressiveHit {
                    transaction_id,
                    progressive_id,
                    level_id,
                    amount,
                })
            },
            |responses| {
                responses.iter().find_map(|r| match r {
                    Response::SetProgressiveWin {
                        transaction_id: t,
                        amount,
                    } if *t == transaction_id => Some(*amount),
                    _ => None,
                })
            },
        );
        match outcome {
            RetryOutcome::Completed(won) => Some(ProgressiveAward {
                amount: won,
                source: AwardSource::Host,
            }),
            RetryOutcome::Cancelled => None,
            other => {
                warn!(
                    "PROGRESSIVE[{}] hit #{} level {} awarded offline ({:?})",
                    core.id(),
                    transaction_id,
                    level_id,
                    other
                );
                Some(ProgressiveAward {
                    amount,
                    source: AwardSource::Offline,
                })
            }
        }
    }

    /// Confirm the amount actually paid.
    pub fn commit(&self, transaction_id: u64, paid_amount: i64) -> bool {
        let core = &self.core;
        let policy = RetryPolicy::for_transaction(core.time_to_live());
        let outcome = request_with_retry(
            core,
            &policy,
            || {
                core.request(Command::ProgressiveCommit {
                    transaction_id,
                    paid_amount,
                })
            },
            |responses| {
                responses
                    .iter()
                    .any(|r| matches!(r, Response::ProgressiveCommitAck { transaction_id: t } if *t == transaction_id))
                    .then_some(())
            },
        );
        if !outcome.is_completed() {
            warn!("PROGRESSIVE[{}] commit #{} ended {:?}", core.id(), transaction_id, outcome);
            return false;
        }
        info!("PROGRESSIVE[{}] commit #{} paid {}", core.id(), transaction_id, paid_amount);
        core.report(
            Occurrence::new(DeviceClass::Progressive, core.id(), G2S_PGE102)
                .with_transaction(transaction_id, Vec::new()),
        );
        true
    }
}

impl Device for ProgressiveDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn event_codes(&self) -> &'static [&'static str] {
        EVENTS
    }
}
