//! Device classes and the event codes this crate reports on its own.
//!
//! Event codes are plain strings on the wire (`G2S_CME100`, ...).  Other
//! device classes bring their own codes; the constants here cover the
//! communications and event-handler classes whose state this crate owns.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Device id that matches every device of a class in subscriptions.
pub const ALL_DEVICES: i32 = -1;

/// G2S device classes known to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceClass {
    Communications,
    EventHandler,
    Cabinet,
    Handpay,
    Voucher,
    Progressive,
    IdReader,
    Gat,
    Download,
}

impl DeviceClass {
    /// Protocol name of the class.
    pub fn name(self) -> &'static str {
        match self {
            Self::Communications => "G2S_communications",
            Self::EventHandler => "G2S_eventHandler",
            Self::Cabinet => "G2S_cabinet",
            Self::Handpay => "G2S_handpay",
            Self::Voucher => "G2S_voucher",
            Self::Progressive => "G2S_progressive",
            Self::IdReader => "G2S_idReader",
            Self::Gat => "G2S_gat",
            Self::Download => "G2S_download",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Communications class
// ═══════════════════════════════════════════════════════════════

/// Comms disabled by the EGM.
pub const G2S_CME001: &str = "G2S_CME001";
/// Comms enabling (online announcement under way).
pub const G2S_CME002: &str = "G2S_CME002";
/// Comms disabled by the host.
pub const G2S_CME003: &str = "G2S_CME003";
/// Comms enabled by the host.
pub const G2S_CME004: &str = "G2S_CME004";
/// Comms configuration changed.
pub const G2S_CME005: &str = "G2S_CME005";
/// Comms established.
pub const G2S_CME100: &str = "G2S_CME100";
/// Comms not established (host busy or not reachable).
pub const G2S_CME101: &str = "G2S_CME101";
/// Transport up.
pub const G2S_CME120: &str = "G2S_CME120";
/// Transport down.
pub const G2S_CME121: &str = "G2S_CME121";
/// Host unreachable.
pub const G2S_CME122: &str = "G2S_CME122";

pub const COMMS_EVENTS: [&str; 10] = [
    G2S_CME001, G2S_CME002, G2S_CME003, G2S_CME004, G2S_CME005, G2S_CME100, G2S_CME101,
    G2S_CME120, G2S_CME121, G2S_CME122,
];

// ═══════════════════════════════════════════════════════════════
//  Event handler class
// ═══════════════════════════════════════════════════════════════

/// Event handler disabled by the EGM (overflow with the disable policy).
pub const G2S_EVE001: &str = "G2S_EVE001";
/// Event handler re-enabled by the EGM.
pub const G2S_EVE002: &str = "G2S_EVE002";
/// Event handler queue overflow.
pub const G2S_EVE005: &str = "G2S_EVE005";
/// Event handler queue overflow cleared.
pub const G2S_EVE006: &str = "G2S_EVE006";

pub const EVENT_HANDLER_EVENTS: [&str; 4] = [G2S_EVE001, G2S_EVE002, G2S_EVE005, G2S_EVE006];
