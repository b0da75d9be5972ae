//! Inbound host commands to the comms runtime.
//!
//! These represent communications-class requests the host sends to the
//! EGM that [`HostComms`](super::comms::HostComms) interprets and acts on.

use crate::config::CommsConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// `setCommsState`: the host enables or disables comms.
    SetCommsState { enable: bool },

    /// New communications configuration; adopted on the way through Closing.
    ConfigChanged(CommsConfig),

    /// The host asked the EGM to close the session.
    Close,
}
