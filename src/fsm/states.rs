//! Concrete state actions and table builder.
//!
//! ```text
//!  CLOSED ──[Enabled]──▶ OPENING ──[Established]──▶ SYNC ──[HostEnabled]──▶ ONLINE
//!    ▲                      │                      ▲  │                     │  ▲
//!    │                      │                      │  │    [OutboundOverflow] │
//!    │                      │             [HostDisabled]                   ▼  │
//!    │                      │                      └──────────────── OVERFLOW ─┘
//!    │                      │                                 [OutboundOverflowCleared]
//!    │      [OutboundOverflow / Error / ConfigChange / InboundOverflow / Close]
//!    │                      ▼
//!    └──[Disabled]──── CLOSING
//! ```

use super::context::{CommsAction, CommsContext};
use super::{CommsState, StateDescriptor, Transition, TransportState, Trigger};
use crate::events::{G2S_CME001, G2S_CME002, G2S_CME003, G2S_CME004, G2S_CME005, G2S_CME100};

use CommsState::{Closed, Closing, Online, Opening, Overflow};

// ═══════════════════════════════════════════════════════════════════════════
//  Permits
// ═══════════════════════════════════════════════════════════════════════════

const CLOSED_PERMITS: &[(Trigger, CommsState)] = &[(Trigger::Enabled, Opening)];

const OPENING_PERMITS: &[(Trigger, CommsState)] = &[
    (Trigger::Established, CommsState::Sync),
    (Trigger::OutboundOverflow, Closing),
    (Trigger::ConfigChange, Closing),
    (Trigger::Close, Closing),
];

const SYNC_PERMITS: &[(Trigger, CommsState)] = &[
    (Trigger::HostEnabled, Online),
    (Trigger::OutboundOverflow, Closing),
    (Trigger::Error, Closing),
    (Trigger::ConfigChange, Closing),
    (Trigger::Close, Closing),
];

const ONLINE_PERMITS: &[(Trigger, CommsState)] = &[
    (Trigger::OutboundOverflow, Overflow),
    (Trigger::Error, Closing),
    (Trigger::ConfigChange, Closing),
    (Trigger::Close, Closing),
    (Trigger::HostDisabled, CommsState::Sync),
];

const OVERFLOW_PERMITS: &[(Trigger, CommsState)] = &[
    (Trigger::OutboundOverflowCleared, Online),
    (Trigger::HostDisabled, CommsState::Sync),
    (Trigger::Error, Closing),
    (Trigger::ConfigChange, Closing),
    (Trigger::InboundOverflow, Closing),
    (Trigger::Close, Closing),
];

const CLOSING_PERMITS: &[(Trigger, CommsState)] = &[(Trigger::Disabled, Closed)];

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the communications state table.  Called once per host.
pub fn build_state_table() -> [StateDescriptor; CommsState::COUNT] {
    [
        // Index 0: Closed
        StateDescriptor {
            id: Closed,
            name: "Closed",
            permits: CLOSED_PERMITS,
            on_enter: Some(closed_enter),
            on_exit: None,
        },
        // Index 1: Opening
        StateDescriptor {
            id: Opening,
            name: "Opening",
            permits: OPENING_PERMITS,
            on_enter: Some(opening_enter),
            on_exit: None,
        },
        // Index 2: Sync
        StateDescriptor {
            id: CommsState::Sync,
            name: "Sync",
            permits: SYNC_PERMITS,
            on_enter: Some(sync_enter),
            on_exit: None,
        },
        // Index 3: Online
        StateDescriptor {
            id: Online,
            name: "Online",
            permits: ONLINE_PERMITS,
            on_enter: Some(online_enter),
            on_exit: None,
        },
        // Index 4: Overflow
        StateDescriptor {
            id: Overflow,
            name: "Overflow",
            permits: OVERFLOW_PERMITS,
            on_enter: None,
            on_exit: None,
        },
        // Index 5: Closing
        StateDescriptor {
            id: Closing,
            name: "Closing",
            permits: CLOSING_PERMITS,
            on_enter: Some(closing_enter),
            on_exit: None,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  CLOSED
// ═══════════════════════════════════════════════════════════════════════════

fn closed_enter(ctx: &mut CommsContext, _t: &Transition) {
    ctx.push(CommsAction::CancelTimers);
    ctx.push(CommsAction::SetTransport(TransportState::TransportDown));
    ctx.push(CommsAction::EnableSend(false));
    ctx.push(CommsAction::SetEgmEnabled(false));
    ctx.push(CommsAction::SetHostEnabled(false));
    ctx.push(CommsAction::Report(G2S_CME001));
    ctx.push(CommsAction::Report(G2S_CME003));
    if ctx.device_open {
        ctx.push(CommsAction::ScheduleReconnect);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  OPENING
// ═══════════════════════════════════════════════════════════════════════════

fn opening_enter(ctx: &mut CommsContext, _t: &Transition) {
    ctx.push(CommsAction::EnableSend(false));
    ctx.push(CommsAction::SetTransport(TransportState::TransportDown));
    ctx.push(CommsAction::SetEgmEnabled(true));
    ctx.push(CommsAction::Report(G2S_CME002));
    ctx.push(CommsAction::BeginOnlineHandshake);
}

// ═══════════════════════════════════════════════════════════════════════════
//  SYNC
// ═══════════════════════════════════════════════════════════════════════════

fn sync_enter(ctx: &mut CommsContext, t: &Transition) {
    match t.trigger {
        Trigger::Established => {
            ctx.push(CommsAction::ClearStartupContext);
            ctx.push(CommsAction::SetTransport(TransportState::TransportUp));
            ctx.push(CommsAction::Report(G2S_CME100));
            ctx.push(CommsAction::StartSyncHandshake);
        }
        Trigger::HostDisabled => {
            ctx.push(CommsAction::EnableSend(false));
            ctx.push(CommsAction::CancelTimers);
            ctx.push(CommsAction::SetHostEnabled(false));
            ctx.push(CommsAction::Report(G2S_CME003));
        }
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ONLINE
// ═══════════════════════════════════════════════════════════════════════════

fn online_enter(ctx: &mut CommsContext, _t: &Transition) {
    ctx.push(CommsAction::CancelTimers);
    ctx.push(CommsAction::SetQueueOnline);
    ctx.push(CommsAction::EnableSend(true));
    ctx.push(CommsAction::SetHostEnabled(true));
    ctx.push(CommsAction::Report(G2S_CME004));
    ctx.push(CommsAction::StartKeepAlive);
}

// ═══════════════════════════════════════════════════════════════════════════
//  CLOSING
// ═══════════════════════════════════════════════════════════════════════════

fn closing_enter(ctx: &mut CommsContext, _t: &Transition) {
    if ctx.config_change_pending {
        ctx.config_change_pending = false;
        ctx.push(CommsAction::FlushConfigChange);
        ctx.push(CommsAction::Report(G2S_CME005));
    }
    ctx.push(CommsAction::EnableSend(false));
    ctx.push(CommsAction::CancelTimers);
    ctx.push(CommsAction::SetHostEnabled(false));
    ctx.push(CommsAction::SendClosing);
}
