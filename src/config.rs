//! Link configuration parameters
//!
//! Per-host communications settings and per-host event handler settings.
//! Values come from defaults, a JSON file (simulator), or the host-driven
//! option surface via [`OptionSource`] using the G2S option parameter names.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ═══════════════════════════════════════════════════════════════
//  Option surface
// ═══════════════════════════════════════════════════════════════

pub const OPT_TIME_TO_LIVE: &str = "G2S_timeToLive";
pub const OPT_NO_RESPONSE_TIMER: &str = "G2S_noResponseTimer";
pub const OPT_KEEP_ALIVE: &str = "G2S_keepAlive";
pub const OPT_QUEUE_BEHAVIOR: &str = "G2S_queueBehavior";
pub const OPT_DISABLE_BEHAVIOR: &str = "G2S_disableBehavior";
pub const OPT_MIN_LOG_ENTRIES: &str = "G2S_minLogEntries";
pub const OPT_EGM_TYPE: &str = "G2S_egmType";
pub const OPT_EGM_LOCATION: &str = "G2S_egmLocation";

/// Already-validated key/value option values for one device.
pub trait OptionSource {
    fn option(&self, name: &str) -> Option<&str>;
}

impl OptionSource for HashMap<String, String> {
    fn option(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl OptionSource for BTreeMap<String, String> {
    fn option(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

fn parse_u32(src: &dyn OptionSource, name: &'static str) -> Result<Option<u32>, ConfigError> {
    src.option(name)
        .map(|raw| {
            raw.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                name,
                value: raw.to_owned(),
            })
        })
        .transpose()
}

// ═══════════════════════════════════════════════════════════════
//  Overflow policies
// ═══════════════════════════════════════════════════════════════

/// What the event queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueBehavior {
    /// Drop the oldest queued event.
    Overwrite,
    /// Disable the event handler, then apply [`DisableBehavior`].
    Disable,
    /// Drop the newest event.
    Discard,
}

impl QueueBehavior {
    pub fn from_option(raw: &str) -> Option<Self> {
        match raw.trim() {
            "G2S_overwrite" | "overwrite" => Some(Self::Overwrite),
            "G2S_disable" | "disable" => Some(Self::Disable),
            "G2S_discard" | "discard" => Some(Self::Discard),
            _ => None,
        }
    }
}

/// Nested behaviour once the queue has disabled the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisableBehavior {
    Overwrite,
    Discard,
}

impl DisableBehavior {
    pub fn from_option(raw: &str) -> Option<Self> {
        match raw.trim() {
            "G2S_overwrite" | "overwrite" => Some(Self::Overwrite),
            "G2S_discard" | "discard" => Some(Self::Discard),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Communications
// ═══════════════════════════════════════════════════════════════

/// Per-host communications configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    // --- Identity ---
    pub host_id: i32,
    pub egm_id: String,
    pub egm_type: String,
    pub egm_location: String,

    // --- Timers ---
    /// Request time-to-live (milliseconds)
    pub time_to_live_ms: u32,
    /// Idle time after which a silent host counts as unresponsive (milliseconds)
    pub no_response_timer_ms: u32,
    /// Keep-alive interval while online; zero disables it (milliseconds)
    pub keep_alive_ms: u32,
    /// Online announcement retry after a non-timeout failure (milliseconds)
    pub default_comms_interval_ms: u32,
    /// Online announcement retry after a timeout (milliseconds)
    pub timeout_retry_ms: u32,
    /// Sync interval used when the host offers none or one below the floor
    pub default_sync_interval_ms: u32,
    /// Floor for the host-provided sync interval (milliseconds)
    pub min_sync_interval_ms: u32,
    /// Delay before reopening from Closed while still enabled (milliseconds)
    pub reconnect_delay_ms: u32,
    /// Bounded wait for the closing notification (milliseconds)
    pub closing_wait_ms: u32,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            host_id: 1,
            egm_id: "EGM_0001".into(),
            egm_type: "G2S_videoSlot".into(),
            egm_location: String::new(),

            time_to_live_ms: 30_000,
            no_response_timer_ms: 300_000, // 5 min
            keep_alive_ms: 30_000,
            default_comms_interval_ms: 30_000,
            timeout_retry_ms: 1_000,
            default_sync_interval_ms: 30_000,
            min_sync_interval_ms: 5_000,
            reconnect_delay_ms: 5_000,
            closing_wait_ms: 5_000,
        }
    }
}

impl CommsConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.time_to_live_ms.into())
    }

    pub fn no_response_timer(&self) -> Duration {
        Duration::from_millis(self.no_response_timer_ms.into())
    }

    /// `None` when keep-alive is disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_ms > 0).then(|| Duration::from_millis(self.keep_alive_ms.into()))
    }

    pub fn default_comms_interval(&self) -> Duration {
        Duration::from_millis(self.default_comms_interval_ms.into())
    }

    pub fn timeout_retry(&self) -> Duration {
        Duration::from_millis(self.timeout_retry_ms.into())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.into())
    }

    pub fn closing_wait(&self) -> Duration {
        Duration::from_millis(self.closing_wait_ms.into())
    }

    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_millis(self.min_sync_interval_ms.into())
    }

    /// Interval to adopt for a host-offered sync timer.  Offers below the
    /// floor fall back to the configured default.
    pub fn adopt_sync_interval(&self, offered: Duration) -> Duration {
        if offered < self.min_sync_interval() {
            Duration::from_millis(self.default_sync_interval_ms.into())
        } else {
            offered
        }
    }

    /// Apply host-provided option values on top of the current settings.
    pub fn apply_options(&mut self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        if let Some(v) = parse_u32(src, OPT_TIME_TO_LIVE)? {
            self.time_to_live_ms = v;
        }
        if let Some(v) = parse_u32(src, OPT_NO_RESPONSE_TIMER)? {
            self.no_response_timer_ms = v;
        }
        if let Some(v) = parse_u32(src, OPT_KEEP_ALIVE)? {
            self.keep_alive_ms = v;
        }
        if let Some(v) = src.option(OPT_EGM_TYPE) {
            self.egm_type = v.to_owned();
        }
        if let Some(v) = src.option(OPT_EGM_LOCATION) {
            self.egm_location = v.to_owned();
        }
        self.validate()
    }

    /// Reject out-of-range values instead of clamping them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_to_live_ms == 0 {
            return Err(ConfigError::ValidationFailed("time_to_live_ms must be > 0"));
        }
        if self.no_response_timer_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "no_response_timer_ms must be > 0",
            ));
        }
        if self.default_comms_interval_ms == 0 || self.timeout_retry_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "handshake retry intervals must be > 0",
            ));
        }
        if self.min_sync_interval_ms == 0 || self.default_sync_interval_ms < self.min_sync_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "default_sync_interval_ms must be >= min_sync_interval_ms > 0",
            ));
        }
        if self.reconnect_delay_ms == 0 || self.closing_wait_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "reconnect_delay_ms and closing_wait_ms must be > 0",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event handler
// ═══════════════════════════════════════════════════════════════

/// Per-host event handler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventHandlerConfig {
    /// Wait between durable delivery attempts (milliseconds)
    pub time_to_live_ms: u32,
    /// Queue capacity, pre-open buffer cap and persisted log cap
    pub min_log_entries: usize,
    pub queue_behavior: QueueBehavior,
    pub disable_behavior: DisableBehavior,
    /// Delivery loop poll period while the host cannot accept (milliseconds)
    pub poll_interval_ms: u32,
}

impl Default for EventHandlerConfig {
    fn default() -> Self {
        Self {
            time_to_live_ms: 30_000,
            min_log_entries: 35,
            queue_behavior: QueueBehavior::Overwrite,
            disable_behavior: DisableBehavior::Overwrite,
            poll_interval_ms: 100,
        }
    }
}

impl EventHandlerConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.time_to_live_ms.into())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.into())
    }

    pub fn apply_options(&mut self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        if let Some(v) = parse_u32(src, OPT_TIME_TO_LIVE)? {
            self.time_to_live_ms = v;
        }
        if let Some(v) = parse_u32(src, OPT_MIN_LOG_ENTRIES)? {
            self.min_log_entries = v as usize;
        }
        if let Some(raw) = src.option(OPT_QUEUE_BEHAVIOR) {
            self.queue_behavior =
                QueueBehavior::from_option(raw).ok_or_else(|| ConfigError::InvalidValue {
                    name: OPT_QUEUE_BEHAVIOR,
                    value: raw.to_owned(),
                })?;
        }
        if let Some(raw) = src.option(OPT_DISABLE_BEHAVIOR) {
            self.disable_behavior =
                DisableBehavior::from_option(raw).ok_or_else(|| ConfigError::InvalidValue {
                    name: OPT_DISABLE_BEHAVIOR,
                    value: raw.to_owned(),
                })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_to_live_ms == 0 {
            return Err(ConfigError::ValidationFailed("time_to_live_ms must be > 0"));
        }
        if self.min_log_entries == 0 {
            return Err(ConfigError::ValidationFailed("min_log_entries must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("poll_interval_ms must be > 0"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transaction devices
// ═══════════════════════════════════════════════════════════════

/// Settings shared by the transaction devices (handpay, voucher, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Base for the request timeout (milliseconds)
    pub time_to_live_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            time_to_live_ms: 30_000,
        }
    }
}

impl DeviceConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.time_to_live_ms.into())
    }

    pub fn apply_options(&mut self, src: &dyn OptionSource) -> Result<(), ConfigError> {
        if let Some(v) = parse_u32(src, OPT_TIME_TO_LIVE)? {
            self.time_to_live_ms = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_to_live_ms == 0 {
            return Err(ConfigError::ValidationFailed("time_to_live_ms must be > 0"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Whole link
// ═══════════════════════════════════════════════════════════════

/// Everything one host link needs, as loaded from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub comms: CommsConfig,
    pub event_handler: EventHandlerConfig,
    pub device: DeviceConfig,
}

impl LinkConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.comms.validate()?;
        self.event_handler.validate()?;
        self.device.validate()
    }
}
