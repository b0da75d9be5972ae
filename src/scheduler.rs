//! Cancellable one-shot and periodic timers.
//!
//! The communications runtime arms several timers per host: a reconnect
//! delay in `Closed`, the sync handshake repeat in `Sync`, and the
//! keep-alive in `Online`.  Each timer runs on its own worker thread and
//! sleeps on a [`CancellationToken`], so cancelling never blocks the
//! caller and never waits for a callback to finish.
//!
//! ```text
//!   Timer::once ──▶ worker ──▶ wait(delay) ──▶ f()
//!   Timer::every ─▶ worker ──▶ [f()] ──▶ wait(interval) ──▶ f() ──▶ ...
//!                                  ▲                          │
//!                                  └──── cancel() stops ──────┘
//! ```

use std::io;
use std::time::Duration;

use log::debug;

use crate::cancel::CancellationToken;
use crate::worker::spawn_worker;

// ═══════════════════════════════════════════════════════════════
//  Timer handle
// ═══════════════════════════════════════════════════════════════

/// Handle to an armed timer.  Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct Timer {
    label: String,
    token: CancellationToken,
}

impl Timer {
    /// Run `f` once after `delay` unless cancelled first.
    pub fn once<F>(label: impl Into<String>, delay: Duration, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.into();
        let token = CancellationToken::new();
        let waiter = token.clone();
        let name = label.clone();
        spawn_worker(label.clone(), move || {
            if !waiter.wait_timeout(delay) {
                debug!("Timer '{}' fired", name);
                f();
            }
        })?;
        Ok(Self { label, token })
    }

    /// Run `f` every `interval` until cancelled.  With `immediate` set the
    /// first call happens right away instead of after one interval.
    pub fn every<F>(
        label: impl Into<String>,
        interval: Duration,
        immediate: bool,
        mut f: F,
    ) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let label = label.into();
        let token = CancellationToken::new();
        let waiter = token.clone();
        spawn_worker(label.clone(), move || {
            if immediate && !waiter.is_cancelled() {
                f();
            }
            while !waiter.wait_timeout(interval) {
                f();
            }
        })?;
        Ok(Self { label, token })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
