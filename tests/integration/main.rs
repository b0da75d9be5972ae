//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one subsystem end to end against the
//! in-process adapters (`SimHostQueue`, `MemoryKv`).  No sockets.

mod comms_tests;
mod event_pipeline_tests;
mod harness;
mod retry_tests;
