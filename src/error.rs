//! Unified error types for the G2S link.
//!
//! Protocol-level failures (timeouts, lost comms, host error codes) are not
//! errors in this crate: they are classified [`SessionState`] values and
//! [`RetryOutcome`] variants.  The types here cover what genuinely fails:
//! bad configuration, storage I/O and malformed state-machine tables.
//!
//! [`SessionState`]: crate::message::SessionState
//! [`RetryOutcome`]: crate::retry::RetryOutcome

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible construction or persistence path funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("fsm: {0}")]
    Fsm(#[from] FsmError),
}

pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An option value could not be parsed for its parameter.
    #[error("invalid value {value:?} for option {name}")]
    InvalidValue { name: &'static str, value: String },
    /// A parsed value is outside the accepted range.
    #[error("validation failed: {0}")]
    ValidationFailed(&'static str),
    /// The configuration file could not be read or decoded.
    #[error("config load failed: {0}")]
    Load(String),
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage read failed")]
    ReadFailed,
    #[error("storage write failed")]
    WriteFailed,
    #[error("storage delete failed")]
    DeleteFailed,
    /// A stored blob could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(String),
}

impl From<postcard::Error> for StorageError {
    fn from(e: postcard::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// State machine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    /// A raw discriminant did not name a communications state.
    #[error("undefined comms state {0}")]
    UndefinedState(u8),
    /// A table row sits at the wrong index for its state id.
    #[error("state table row {index} holds {found}")]
    MisplacedRow { index: usize, found: &'static str },
    /// A state permits the same trigger twice.
    #[error("state {state} permits {trigger} more than once")]
    DuplicatePermit {
        state: &'static str,
        trigger: &'static str,
    },
    /// A state can never be entered from the initial state.
    #[error("state {0} is unreachable")]
    Unreachable(&'static str),
    /// A state has no path back to Closed.
    #[error("state {0} cannot reach Closed")]
    NoPathToClosed(&'static str),
}
