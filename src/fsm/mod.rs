//! Table-driven communications state machine.
//!
//! One machine per host connection.  Each row of the table names the
//! triggers a state permits and the state each one leads to, plus the
//! entry and exit actions:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StateTable                                                  │
//! │  ┌──────────┬──────────────────────────┬──────────┬────────┐ │
//! │  │ State    │ permits                  │ on_enter │on_exit │ │
//! │  ├──────────┼──────────────────────────┼──────────┼────────┤ │
//! │  │ Closed   │ Enabled → Opening        │ fn(ctx)  │        │ │
//! │  │ Opening  │ Established → Sync, ...  │ fn(ctx)  │        │ │
//! │  │ Sync     │ HostEnabled → Online,... │ fn(ctx)  │        │ │
//! │  │ Online   │ OutboundOverflow → ...   │ fn(ctx)  │        │ │
//! │  │ Overflow │ ...Cleared → Online, ... │          │        │ │
//! │  │ Closing  │ Disabled → Closed        │ fn(ctx)  │        │ │
//! │  └──────────┴──────────────────────────┴──────────┴────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Firing a trigger the current state does not permit is a no-op.  Entry
//! and exit actions are plain functions over the [`CommsContext`]
//! blackboard: they never perform I/O themselves, they queue
//! [`CommsAction`](context::CommsAction)s that the runtime executes.

pub mod context;
pub mod states;

use core::fmt;

use context::CommsContext;
use log::{debug, info};

use crate::error::FsmError;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Communications state of one host connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommsState {
    Closed = 0,
    Opening = 1,
    Sync = 2,
    Online = 3,
    Overflow = 4,
    Closing = 5,
}

impl CommsState {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 6;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Closed,
        Self::Opening,
        Self::Sync,
        Self::Online,
        Self::Overflow,
        Self::Closing,
    ];

    /// Convert a table index back to `CommsState`.  Out-of-range indices
    /// assert in debug builds and map to `Closed` in release.
    pub fn from_index(idx: usize) -> Self {
        Self::ALL.get(idx).copied().unwrap_or_else(|| {
            debug_assert!(false, "invalid state index: {idx}");
            Self::Closed
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Opening => "Opening",
            Self::Sync => "Sync",
            Self::Online => "Online",
            Self::Overflow => "Overflow",
            Self::Closing => "Closing",
        }
    }
}

impl TryFrom<u8> for CommsState {
    type Error = FsmError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or(FsmError::UndefinedState(raw))
    }
}

impl fmt::Display for CommsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Triggers that drive the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Enabled,
    Established,
    HostEnabled,
    HostDisabled,
    OutboundOverflow,
    OutboundOverflowCleared,
    InboundOverflow,
    Error,
    ConfigChange,
    Close,
    Disabled,
}

impl Trigger {
    pub const ALL: [Self; 11] = [
        Self::Enabled,
        Self::Established,
        Self::HostEnabled,
        Self::HostDisabled,
        Self::OutboundOverflow,
        Self::OutboundOverflowCleared,
        Self::InboundOverflow,
        Self::Error,
        Self::ConfigChange,
        Self::Close,
        Self::Disabled,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Established => "Established",
            Self::HostEnabled => "HostEnabled",
            Self::HostDisabled => "HostDisabled",
            Self::OutboundOverflow => "OutboundOverflow",
            Self::OutboundOverflowCleared => "OutboundOverflowCleared",
            Self::InboundOverflow => "InboundOverflow",
            Self::Error => "Error",
            Self::ConfigChange => "ConfigChange",
            Self::Close => "Close",
            Self::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Health of the link underneath the comms state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportState {
    TransportUp = 0,
    TransportDown = 1,
    HostUnreachable = 2,
}

impl TransportState {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::TransportUp),
            1 => Some(Self::TransportDown),
            2 => Some(Self::HostUnreachable),
            _ => None,
        }
    }
}

/// One fired transition, passed to entry and exit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CommsState,
    pub to: CommsState,
    pub trigger: Trigger,
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut CommsContext, &Transition);

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor {
    pub id: CommsState,
    pub name: &'static str,
    /// `(trigger, destination)` pairs this state accepts.
    pub permits: &'static [(Trigger, CommsState)],
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
}

impl StateDescriptor {
    fn target(&self, trigger: Trigger) -> Option<CommsState> {
        self.permits
            .iter()
            .find(|(t, _)| *t == trigger)
            .map(|(_, to)| *to)
    }
}

/// Check a table for misplaced rows, duplicate permits, unreachable states
/// and states with no way back to `Closed`.
pub fn validate_table(table: &[StateDescriptor; CommsState::COUNT]) -> Result<(), FsmError> {
    for (index, row) in table.iter().enumerate() {
        if row.id as usize != index {
            return Err(FsmError::MisplacedRow {
                index,
                found: row.name,
            });
        }
        for (i, (trigger, _)) in row.permits.iter().enumerate() {
            if row.permits[..i].iter().any(|(t, _)| t == trigger) {
                return Err(FsmError::DuplicatePermit {
                    state: row.name,
                    trigger: trigger.name(),
                });
            }
        }
    }

    // Forward reachability from Closed.
    let mut reached = [false; CommsState::COUNT];
    let mut stack = vec![CommsState::Closed];
    while let Some(s) = stack.pop() {
        if std::mem::replace(&mut reached[s as usize], true) {
            continue;
        }
        stack.extend(table[s as usize].permits.iter().map(|(_, to)| *to));
    }
    if let Some(idx) = reached.iter().position(|r| !r) {
        return Err(FsmError::Unreachable(table[idx].name));
    }

    // Backward reachability to Closed.
    let mut closes = [false; CommsState::COUNT];
    closes[CommsState::Closed as usize] = true;
    let mut changed = true;
    while changed {
        changed = false;
        for row in table {
            if !closes[row.id as usize] && row.permits.iter().any(|(_, to)| closes[*to as usize]) {
                closes[row.id as usize] = true;
                changed = true;
            }
        }
    }
    if let Some(idx) = closes.iter().position(|c| !c) {
        return Err(FsmError::NoPathToClosed(table[idx].name));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The communications state machine engine.
pub struct CommsFsm {
    table: [StateDescriptor; CommsState::COUNT],
    current: usize,
    /// Number of transitions fired since construction.
    transitions: u64,
}

impl CommsFsm {
    /// Construct a machine over a validated table, starting in `initial`.
    /// The initial state's entry action does not run.
    pub fn new(
        table: [StateDescriptor; CommsState::COUNT],
        initial: CommsState,
    ) -> Result<Self, FsmError> {
        validate_table(&table)?;
        Ok(Self {
            table,
            current: initial as usize,
            transitions: 0,
        })
    }

    pub fn current_state(&self) -> CommsState {
        CommsState::from_index(self.current)
    }

    /// Destination of `trigger` from the current state, if permitted.
    pub fn target(&self, trigger: Trigger) -> Option<CommsState> {
        self.table[self.current].target(trigger)
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Fire a trigger.  Returns the transition taken, or `None` when the
    /// current state does not permit the trigger.
    pub fn fire(&mut self, trigger: Trigger, ctx: &mut CommsContext) -> Option<Transition> {
        let from = self.current_state();
        let Some(to) = self.target(trigger) else {
            debug!(
                "COMMS[{}] trigger {} ignored in state {}",
                ctx.host_id, trigger, from
            );
            return None;
        };

        let transition = Transition { from, to, trigger };
        info!(
            "COMMS[{}] transition: {} -> {} ({})",
            ctx.host_id, from, to, trigger
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx, &transition);
        }
        self.current = to as usize;
        self.transitions += 1;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx, &transition);
        }
        Some(transition)
    }
}
