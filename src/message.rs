//! Typed protocol messages.
//!
//! The wire encoding belongs to the transport; the link only sees typed
//! commands going out and typed responses coming back.  Transaction-bearing
//! messages expose their id so callers can match echoes.

use crate::event_handler::report::QueuedEvent;
use crate::events::DeviceClass;

/// Request error codes that mean "the host is there but will not talk".
pub const ERR_HOST_BUSY: &str = "G2S_MSX006";
pub const ERR_HOST_NOT_REACHABLE: &str = "G2S_MSX007";

// ───────────────────────────────────────────────────────────────
// Session outcome
// ───────────────────────────────────────────────────────────────

/// Lifecycle of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Pending,
    Success,
    TimedOut,
    RequestError,
    ResponseError,
    CommsLost,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Error attached to a request the host rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub code: String,
    pub is_error: bool,
}

impl RequestError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            is_error: true,
        }
    }

    /// Host busy or host not reachable.
    pub fn is_host_unavailable(&self) -> bool {
        self.is_error && (self.code == ERR_HOST_BUSY || self.code == ERR_HOST_NOT_REACHABLE)
    }
}

// ───────────────────────────────────────────────────────────────
// Outbound
// ───────────────────────────────────────────────────────────────

/// What changed since the EGM last talked to this host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnlineFlags {
    pub device_reset: bool,
    pub device_changed: bool,
    pub subscription_lost: bool,
    pub meters_reset: bool,
    pub device_state_changed: bool,
    pub device_access_changed: bool,
}

impl OnlineFlags {
    /// Flags carried by the first announcement after a cold start.
    pub fn cold_start() -> Self {
        Self {
            device_reset: true,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.device_reset |= other.device_reset;
        self.device_changed |= other.device_changed;
        self.subscription_lost |= other.subscription_lost;
        self.meters_reset |= other.meters_reset;
        self.device_state_changed |= other.device_state_changed;
        self.device_access_changed |= other.device_access_changed;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CommsOnLine {
        egm_type: String,
        egm_location: String,
        flags: OnlineFlags,
    },
    CommsDisabled,
    KeepAlive,
    CommsClosing,
    EventReport(QueuedEvent),
    HandpayRequest {
        transaction_id: u64,
        amount: i64,
    },
    KeyedOff {
        transaction_id: u64,
        amount: i64,
    },
    IssueVoucher {
        transaction_id: u64,
        validation_id: String,
        amount: i64,
    },
    RedeemVoucher {
        transaction_id: u64,
        validation_id: String,
    },
    CommitVoucher {
        transaction_id: u64,
        validation_id: String,
        amount: i64,
    },
    ProgressiveHit {
        transaction_id: u64,
        progressive_id: i32,
        level_id: i32,
        amount: i64,
    },
    ProgressiveCommit {
        transaction_id: u64,
        paid_amount: i64,
    },
    VerificationResult {
        transaction_id: u64,
        verification_id: u64,
        component_id: String,
        passed: bool,
    },
    DownloadStatus {
        transaction_id: u64,
        package_id: String,
        status: String,
    },
    GetIdValidation {
        transaction_id: u64,
        id_number: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommsOnLine { .. } => "commsOnLine",
            Self::CommsDisabled => "commsDisabled",
            Self::KeepAlive => "keepAlive",
            Self::CommsClosing => "commsClosing",
            Self::EventReport(_) => "eventReport",
            Self::HandpayRequest { .. } => "handpayRequest",
            Self::KeyedOff { .. } => "keyedOff",
            Self::IssueVoucher { .. } => "issueVoucher",
            Self::RedeemVoucher { .. } => "redeemVoucher",
            Self::CommitVoucher { .. } => "commitVoucher",
            Self::ProgressiveHit { .. } => "progressiveHit",
            Self::ProgressiveCommit { .. } => "progressiveCommit",
            Self::VerificationResult { .. } => "verificationResult",
            Self::DownloadStatus { .. } => "downloadStatus",
            Self::GetIdValidation { .. } => "getIdValidation",
        }
    }

    pub fn transaction_id(&self) -> Option<u64> {
        match self {
            Self::HandpayRequest { transaction_id, .. }
            | Self::KeyedOff { transaction_id, .. }
            | Self::IssueVoucher { transaction_id, .. }
            | Self::RedeemVoucher { transaction_id, .. }
            | Self::CommitVoucher { transaction_id, .. }
            | Self::ProgressiveHit { transaction_id, .. }
            | Self::ProgressiveCommit { transaction_id, .. }
            | Self::VerificationResult { transaction_id, .. }
            | Self::DownloadStatus { transaction_id, .. }
            | Self::GetIdValidation { transaction_id, .. } => Some(*transaction_id),
            Self::EventReport(event) => event.transaction_id,
            Self::CommsOnLine { .. } | Self::CommsDisabled | Self::KeepAlive | Self::CommsClosing => {
                None
            }
        }
    }

    /// Communications-class commands are exchanged regardless of `CanSend`.
    pub fn is_comms_class(&self) -> bool {
        matches!(
            self,
            Self::CommsOnLine { .. } | Self::CommsDisabled | Self::KeepAlive | Self::CommsClosing
        )
    }
}

/// One outbound request addressed from a device to its owning host.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub host_id: i32,
    pub device_class: DeviceClass,
    pub device_id: i32,
    pub command: Command,
}

impl Request {
    pub fn new(host_id: i32, device_class: DeviceClass, device_id: i32, command: Command) -> Self {
        Self {
            host_id,
            device_class,
            device_id,
            command,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Inbound
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    CommsOnLineAck {
        sync_timer_ms: u32,
    },
    CommsDisabledAck,
    KeepAliveAck,
    CommsClosingAck,
    EventAck {
        event_id: u64,
    },
    HandpayAck {
        transaction_id: u64,
    },
    KeyedOffAck {
        transaction_id: u64,
    },
    IssueVoucherAck {
        transaction_id: u64,
    },
    AuthorizeVoucher {
        transaction_id: u64,
        amount: i64,
        accepted: bool,
    },
    CommitVoucherAck {
        transaction_id: u64,
    },
    SetProgressiveWin {
        transaction_id: u64,
        amount: i64,
    },
    ProgressiveCommitAck {
        transaction_id: u64,
    },
    VerificationResultAck {
        transaction_id: u64,
    },
    DownloadStatusAck {
        transaction_id: u64,
    },
    SetIdValidation {
        transaction_id: u64,
        id_number: String,
        id_type: String,
        valid: bool,
        player_id: Option<String>,
    },
}

impl Response {
    pub fn transaction_id(&self) -> Option<u64> {
        match self {
            Self::HandpayAck { transaction_id }
            | Self::KeyedOffAck { transaction_id }
            | Self::IssueVoucherAck { transaction_id }
            | Self::AuthorizeVoucher { transaction_id, .. }
            | Self::CommitVoucherAck { transaction_id }
            | Self::SetProgressiveWin { transaction_id, .. }
            | Self::ProgressiveCommitAck { transaction_id }
            | Self::VerificationResultAck { transaction_id }
            | Self::DownloadStatusAck { transaction_id }
            | Self::SetIdValidation { transaction_id, .. } => Some(*transaction_id),
            Self::CommsOnLineAck { .. }
            | Self::CommsDisabledAck
            | Self::KeepAliveAck
            | Self::CommsClosingAck
            | Self::EventAck { .. } => None,
        }
    }
}
