//! Named worker-thread spawning.
//!
//! Delivery loops, retry chains, reconnect delays and timers each run on
//! their own OS thread.  Threads are named after their role and host so
//! they are identifiable in a debugger or a thread dump.

use std::io;
use std::thread::{Builder, JoinHandle};

/// Stack size for link worker threads.  Workers only block on sessions
/// and condvars, so they need far less than the platform default.
pub const WORKER_STACK_KB: usize = 256;

/// Spawn a named worker thread.
pub fn spawn_worker<F, T>(name: String, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    log::debug!("Spawning worker '{}' (stack={}KB)", name, WORKER_STACK_KB);
    Builder::new()
        .name(name)
        .stack_size(WORKER_STACK_KB * 1024)
        .spawn(f)
}

/// Spawn a detached worker, logging instead of failing when the OS refuses.
///
/// Returns whether the thread was started.
pub fn spawn_detached<F>(name: String, f: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    match spawn_worker(name.clone(), f) {
        Ok(_) => true,
        Err(e) => {
            log::error!("Worker '{}' failed to start: {}", name, e);
            false
        }
    }
}
