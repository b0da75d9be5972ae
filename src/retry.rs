//! Request/retry loop shared by the transaction devices.
//!
//! ```text
//!   precondition (open + CanSend) ──no──▶ Unavailable
//!          │
//!          ▼
//!   send ──▶ wait(timeout) ──▶ classify
//!     ▲                          │
//!     │   TimedOut: resend now   ├── Success + matching echo ──▶ Completed
//!     ├──────────────────────────┤
//!     │   other: resend after    ├── CommsLost ──▶ CommsLost (no resend)
//!     └── failure_delay ─────────┘
//! ```
//!
//! Each attempt checks the device token, the deadline and the
//! precondition first, so a close or an outage stops the chain between
//! attempts without another send.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cancel::CancellationToken;
use crate::device::DeviceCore;
use crate::message::{Request, Response, SessionState};
use crate::worker::spawn_detached;

/// Floor applied to the time-to-live before doubling.
const TRANSACTION_TTL_FLOOR: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on each wait for completion.
    pub timeout: Duration,
    /// Pause before resending after a failure other than a timeout.
    pub failure_delay: Option<Duration>,
    /// Give up once this instant passes.
    pub deadline: Option<Instant>,
}

impl RetryPolicy {
    /// `max(ttl, 30s) * 2` per attempt, immediate resend, no deadline.
    pub fn for_transaction(ttl: Duration) -> Self {
        Self {
            timeout: ttl.max(TRANSACTION_TTL_FLOOR) * 2,
            failure_delay: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Wait bound for the next attempt, or `None` once the deadline passed.
    fn next_wait(&self, now: Instant) -> Option<Duration> {
        match self.deadline {
            Some(deadline) if now >= deadline => None,
            Some(deadline) => Some(self.timeout.min(deadline - now)),
            None => Some(self.timeout),
        }
    }
}

/// How a retry chain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    /// The device was closed or the host could not accept traffic.
    Unavailable,
    /// The transport lost the host; never retried.
    CommsLost,
    /// The device token was cancelled.
    Cancelled,
    DeadlineElapsed,
}

impl<T> RetryOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(v) => Some(v),
            _ => None,
        }
    }
}

/// Send `build()` until `accept` finds an answer in a successful
/// session's responses, or the chain ends.
///
/// `accept` returns `None` for a response that does not belong to this
/// request (missing, or echoing another transaction id); that counts as a
/// failure and is retried.
pub fn request_with_retry<T>(
    core: &DeviceCore,
    policy: &RetryPolicy,
    mut build: impl FnMut() -> Request,
    mut accept: impl FnMut(&[Response]) -> Option<T>,
) -> RetryOutcome<T> {
    let mut token: Option<CancellationToken> = None;
    let mut attempt: u32 = 0;
    loop {
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return RetryOutcome::Cancelled;
        }
        if !core.can_send() {
            return RetryOutcome::Unavailable;
        }
        let Some(wait) = policy.next_wait(Instant::now()) else {
            return RetryOutcome::DeadlineElapsed;
        };

        attempt += 1;
        let request = build();
        let name = request.command.name();
        let mut session = core.host().queue.send(request, Some(wait));
        let state = session.wait_for_completion(Some(wait));
        core.host().session_completed(state, session.request_error());

        let delay = match state {
            SessionState::Success => {
                if let Some(answer) = accept(session.responses()) {
                    debug!(
                        "{}[{}] {} completed after {} attempt(s)",
                        core.class(),
                        core.id(),
                        name,
                        attempt
                    );
                    return RetryOutcome::Completed(answer);
                }
                warn!(
                    "{}[{}] {} answered without a matching response",
                    core.class(),
                    core.id(),
                    name
                );
                policy.failure_delay
            }
            SessionState::CommsLost => {
                warn!("{}[{}] {} comms lost", core.class(), core.id(), name);
                return RetryOutcome::CommsLost;
            }
            SessionState::TimedOut => {
                debug!("{}[{}] {} timed out, resending", core.class(), core.id(), name);
                None
            }
            other => {
                warn!(
                    "{}[{}] {} failed ({:?}), retrying",
                    core.class(),
                    core.id(),
                    name,
                    other
                );
                policy.failure_delay
            }
        };

        let current = token.get_or_insert_with(|| core.retry_token());
        if let Some(delay) = delay {
            // A close that landed before the token existed cancelled nothing.
            if !core.is_open() || current.wait_timeout(delay) {
                return RetryOutcome::Cancelled;
            }
        }
    }
}

/// Run a retry chain on its own worker thread.  Returns whether the
/// thread started.
pub fn spawn_retry_chain<F>(name: String, chain: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    spawn_detached(name, chain)
}
