//! ID reader device: validate a presented card with the host, falling back
//! to local pattern matching when the host cannot answer in time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::RwLock;
use regex::Regex;

use crate::app::host::HostContext;
use crate::config::DeviceConfig;
use crate::device::{Device, DeviceCore};
use crate::error::ConfigError;
use crate::event_handler::{EventHandlerRegistry, Occurrence};
use crate::events::DeviceClass;
use crate::message::{Command, Response};
use crate::retry::{RetryOutcome, RetryPolicy, request_with_retry};

/// ID presented.
pub const G2S_IDE101: &str = "G2S_IDE101";
/// ID validated.
pub const G2S_IDE102: &str = "G2S_IDE102";

const EVENTS: &[&str] = &[G2S_IDE101, G2S_IDE102];

/// Type given to a number no pattern recognises.
pub const ID_TYPE_UNKNOWN: &str = "G2S_unknown";

/// A card-number pattern and the id type it identifies.
#[derive(Debug, Clone)]
pub struct IdTypePattern {
    pub id_type: String,
    pub pattern: Regex,
}

impl IdTypePattern {
    pub fn new(id_type: impl Into<String>, pattern: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern).map_err(|_| ConfigError::InvalidValue {
            name: "G2S_idPattern",
            value: pattern.to_owned(),
        })?;
        Ok(Self {
            id_type: id_type.into(),
            pattern,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdValidation {
    pub id_number: String,
    pub id_type: String,
    pub valid: bool,
    pub player_id: Option<String>,
    /// Resolved locally without a host answer.
    pub offline: bool,
}

pub struct IdReaderDevice {
    core: DeviceCore,
    patterns: RwLock<Vec<IdTypePattern>>,
}

impl IdReaderDevice {
    pub fn new(
        id: i32,
        host: HostContext,
        registry: &Arc<EventHandlerRegistry>,
        config: DeviceConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: DeviceCore::new(DeviceClass::IdReader, id, host, registry, config)?,
            patterns: RwLock::new(Vec::new()),
        })
    }

    /// Replace the offline patterns, checked in order.
    pub fn set_patterns(&self, patterns: Vec<IdTypePattern>) {
        *self.patterns.write() = patterns;
    }

    /// Local classification used when the host is out of reach.
    pub fn classify_offline(&self, id_number: &str) -> IdValidation {
        let patterns = self.patterns.read();
        let matched = patterns.iter().find(|p| p.pattern.is_match(id_number));
        IdValidation {
            id_number: id_number.to_owned(),
            id_type: matched.map_or_else(|| ID_TYPE_UNKNOWN.to_owned(), |p| p.id_type.clone()),
            valid: false,
            player_id: None,
            offline: true,
        }
    }

    /// Ask the host to validate `id_number`, waiting at most `deadline`.
    /// Returns `None` only when the device closed mid-chain.
    pub fn validate(
        &self,
        transaction_id: u64,
        id_number: &str,
        deadline: Duration,
    ) -> Option<IdValidation> {
        let core = &self.core;
        core.report(
            Occurrence::new(DeviceClass::IdReader, core.id(), G2S_IDE101)
                .with_transaction(transaction_id, Vec::new()),
        );
        let policy = RetryPolicy::for_transaction(core.time_to_live())
            .with_deadline(Instant::now() + deadline);
        let outcome = request_with_retry(
            core,
            &policy,
            || {
                core.request(Command::GetIdValidation {
                    transaction_id,
                    id_number: id_number.to_owned(),
                })
            },
            |responses| {
                responses.iter().find_map(|r| match r {
                    Response::SetIdValidation {
                        transaction_id: t,
                        id_number: echoed,
                        id_type,
                        valid,
                        player_id,
                    } if *t == transaction_id && echoed == id_number => Some(IdValidation {
                        id_number: echoed.clone(),
                        id_type: id_type.clone(),
                        valid: *valid,
                        player_id: player_id.clone(),
                        offline: false,
                    }),
                    _ => None,
                })
            },
        );
        let validation = match outcome {
            RetryOutcome::Completed(v) => v,
            RetryOutcome::Cancelled => return None,
            other => {
                warn!(
                    "IDREADER[{}] validation #{} resolved offline ({:?})",
                    core.id(),
                    transaction_id,
                    other
                );
                self.classify_offline(id_number)
            }
        };
        debug!(
            "IDREADER[{}] #{} type={} valid={}",
            core.id(),
            transaction_id,
            validation.id_type,
            validation.valid
        );
        core.report(
            Occurrence::new(DeviceClass::IdReader, core.id(), G2S_IDE102)
                .with_transaction(transaction_id, Vec::new()),
        );
        Some(validation)
    }
}

impl Device for IdReaderDevice {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn event_codes(&self) -> &'static [&'static str] {
        EVENTS
    }
}
