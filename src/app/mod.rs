//! Application core: the per-host communications runtime and its ports.
//!
//! Everything here is transport-agnostic.  The host message queue, event
//! persistence and status observers are reached only through the
//! **port traits** in [`ports`], so the runtime is fully testable against
//! the in-process adapters.

pub mod commands;
pub mod comms;
pub mod events;
pub mod host;
pub mod ports;
