//! Handpay device: request a hand-paid win and acknowledge its key-off.

use std::sync::Arc;

use log::{info, warn};

use crate::app::host::HostContext;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceCore};
use crate::error::ConfigError;
use crate::event_handler::{EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Response};
use crate::retry::{RetryOutcome, RetryPolicy, request_with_retry};

/// Handpay pending.
pub const G2S_JPE101: &str = "G2S_JPE101";
/// Handpay keyed off.
pub const G2S_JPE103: &str = "G2S_JPE103";

const EVENTS: &[&str] = &[G2S_JPE101, G2S_JPE103];

pub struct HandpayDevice {
    core: DeviceCore,
}

impl HandpayDevice {
    pub fn new(
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: DeviceCore::new(DeviceClass::Handpay, id, host, registry, config)?,
        })
    }

    /// Ask the host to acknowledge a pending handpay.  Blocks until the
    /// host answers, the device closes or the transport is lost.
    pub fn request(&self, transaction_id: u64, amount: i64) -> bool {
        let core = &self.core;
        let policy = RetryPolicy::for_transaction(core.time_to_live());
        let outcome = request_with_retry(
            core,
            &policy,
            || core.request(Command::HandpayRequest {
                transaction_id,
                amount,
            }),
            |responses| {
                responses.iter().find_map(|r| match r {
                    Response::HandpayAck { transaction_id: t } if *t == transaction_id => Some(()),
                    _ => None,
                })
            },
        );
        self.finish("handpayRequest", transaction_id, amount, G2S_JPE101, &outcome)
    }

    /// Tell the host the handpay was keyed off.
    pub fn keyed_off(&self, transaction_id: u64, amount: i64) -> bool {
        let core = &self.core;
        let policy = RetryPolicy::for_transaction(core.time_to_live());
        let outcome = request_with_retry(
            core,
            &policy,
            || core.request(Command::KeyedOff {
                transaction_id,
                amount,
            }),
            |responses| {
                responses.iter().find_map(|r| match r {
                    Response::KeyedOffAck { transaction_id: t } if *t == transaction_id => Some(()),
                    _ => None,
                })
            },
        );
        self.finish("keyedOff", transaction_id, amount, G2S_JPE103, &outcome)
    }

    fn finish(
        &self,
        op: &str,
        transaction_id: u64,
        amount: i64,
        event_code: &str,
        outcome: &RetryOutcome<()>,
    ) -> bool {
        if !outcome.is_completed() {
            warn!(
                "HANDPAY[{}] {} #{} ended {:?}",
                self.core.id(),
                op,
                transaction_id,
                outcome
            );
            return false;
        }
        info!(
            "HANDPAY[{}] {} #{} acknowledged ({})",
            self.core.id(),
            op,
            transaction_id,
            amount
        );
        self.core.report(
            Occurrence::new(DeviceClass::Handpay, self.core.id(), event_code)
                .with_transaction(transaction_id, Vec::new()),
        );
        true
    }
}

impl Device for HandpayDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn event_codes(&self) -> &'static [&'static str] {
        EVENTS
    }
}
