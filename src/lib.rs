//! G2S host link for EGM clients.
//!
//! Keeps one communications state machine per host, fans device events out
//! to per-host report queues, and gives transaction devices a shared
//! request/retry loop.  The transport and persistence are injected through
//! the port traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod cancel;
pub mod config;
pub mod device;
pub mod devices;
pub mod error;
pub mod event_handler;
pub mod events;
pub mod fsm;
pub mod message;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use error::{Error, Result};
