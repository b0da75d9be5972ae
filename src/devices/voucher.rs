//! Voucher device: issue, redeem and commit printed vouchers.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::app::host::HostContext;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceCore};
use crate::error::ConfigError;
use crate::event_handler::{EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Response};
use crate::retry::{RetryPolicy, request_with_retry};

/// Voucher issued.
pub const G2S_VCE101: &str = "G2S_VCE101";
/// Voucher redeemed.
pub const G2S_VCE103: &str = "G2S_VCE103";

const EVENTS: &[&str] = &[G2S_VCE101, G2S_VCE103];

/// Pause between commit attempts after a failed exchange.
const COMMIT_FAILURE_DELAY: Duration = Duration::from_millis(500);

/// The host's answer to a redemption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoucherAuthorization {
    pub amount: i64,
    pub accepted: bool,
}

pub struct VoucherDevice {
    core: DeviceCore,
}

impl VoucherDevice {
    pub fn new(
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: DeviceCore::new(DeviceClass::Voucher, id, host, registry, config)?,
        })
    }

    /// Report a printed voucher to the host.
    pub fn issue(&self, transaction_id: u64, validation_id: &str, amount: i64) -> bool {
        let core = &self.core;
        let policy = RetryPolicy::for_transaction(core.time_to_live());
        let outcome = request_with_retry(
            core,
            &policy,
            || {
                core.request(Command::IssueVoucher {
                    transaction_id,
                    validation_id: validation_id.to_owned(),
                    amount,
                })
            },
            |responses| {
                responses
                    .iter()
                    .any(|r| matches!(r, Response::IssueVoucherAck { transaction_id: t } if *t == transaction_id))
                    .then_some(())
            },
        );
        if !outcome.is_completed() {
            warn!("VOUCHER[{}] issue #{} ended {:?}", core.id(), transaction_id, outcome);
            return false;
        }
        core.report(
            Occurrence::new(DeviceClass::Voucher, core.id(), G2S_VCE101)
                .with_transaction(transaction_id, Vec::new()),
        );
        true
    }

    /// Ask the host to authorize an inserted voucher.  `None` when no
    /// authorization arrived.
    pub fn redeem(&self, transaction_id: u64, validation_id: &str) -> Option<VoucherAuthorization> {
        let core = &self.core;
        let policy = RetryPolicy::for_transaction(core.time_to_live());
        let outcome = request_with_retry(
            core,
            &policy,
            || {
                core.request(Command::RedeemVoucher {
                    transaction_id,
                    validation_id: validation_id.to_owned(),
                })
            },
            |responses| {
                responses.iter().find_map(|r| match r {
                    Response::AuthorizeVoucher {
                        transaction_id: t,
                        amount,
                        accepted,
                    } if *t == transaction_id => Some(VoucherAuthorization {
                        amount: *amount,
                        accepted: *accepted,
                    }),
                    _ => None,
                })
            },
        );
        let auth = outcome.completed();
        match auth {
            Some(a) => info!(
                "VOUCHER[{}] redeem #{} {} for {}",
                core.id(),
                transaction_id,
                if a.accepted { "authorized" } else { "rejected" },
                a.amount
            ),
            None => warn!("VOUCHER[{}] redeem #{} unanswered", core.id(), transaction_id),
        }
        auth
    }

    /// Confirm the outcome of a redemption.  Failed exchanges are retried
    /// after a short pause.
    pub fn commit(&self, transaction_id: u64, validation_id: &str, amount: i64) -> bool {
        let core = &self.core;
        let policy = RetryPolicy::for_transaction(core.time_to_live())
            .with_failure_delay(COMMIT_FAILURE_DELAY);
        let outcome = request_with_retry(
            core,
            &policy,
            || {
                core.request(Command::CommitVoucher {
                    transaction_id,
                    validation_id: validation_id.to_owned(),
                    amount,
                })
            },
            |responses| {
                responses
                    .iter()
                    .any(|r| matches!(r, Response::CommitVoucherAck { transaction_id: t } if *t == transaction_id))
                    .then_some(())
            },
        );
        if !outcome.is_completed() {
            warn!("VOUCHER[{}] commit #{} ended {:?}", core.id(), transaction_id, outcome);
            return false;
        }
        core.report(
            Occurrence::new(DeviceClass::Voucher, core.id(), G2S_VCE103)
                .with_transaction(transaction_id, Vec::new()),
        );
        true
    }
}

impl Device for VoucherDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn event_codes(&self) -> &'static [&'static str] {
        EVENTS
    }
}
