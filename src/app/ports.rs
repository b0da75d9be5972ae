//! Port traits: the hexagonal boundary between the link and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ HostComms / EventHandler (domain)
//! ```
//!
//! The transport (host message queue and its sessions), the event
//! persistence manager, key/value storage and status observers are all
//! injected through these traits.  The domain core never opens a socket or
//! touches a file.
//!
//! Every port is shared across worker threads, so every trait is
//! `Send + Sync` and takes `&self`; implementations own their locking.

use std::time::Duration;

use crate::app::events::CommsNotice;
use crate::error::StorageError;
use crate::event_handler::report::{EventLogEntry, QueuedEvent, SupportedEvent};
use crate::event_handler::subscription::{EventSubscription, SubscriptionKey};
use crate::message::{Request, RequestError, Response, SessionState};

// ───────────────────────────────────────────────────────────────
// Host message queue (driven adapter: domain → transport)
// ───────────────────────────────────────────────────────────────

/// Per-host transport queue.
pub trait HostQueue: Send + Sync {
    /// Queue a request and return the session tracking its response.
    fn send(&self, request: Request, timeout: Option<Duration>) -> Box<dyn Session>;

    /// Queue a request that expects no response.
    fn send_notification(&self, request: Request);

    /// Whether application traffic may be sent right now.
    fn can_send(&self) -> bool;

    /// Time since the last message went out.
    fn sent_elapsed(&self) -> Duration;

    /// Time since the last message came in.
    fn received_elapsed(&self) -> Duration;

    fn enable_send(&self, enable: bool);

    fn disable_send(&self) {
        self.enable_send(false);
    }

    /// Mark the queue as online (host enabled comms).
    fn set_online(&self);

    fn outbound_queue_full(&self) -> bool;

    fn inbound_queue_full(&self) -> bool;

    fn session_timeout(&self) -> Duration;

    fn set_session_timeout(&self, timeout: Duration);
}

/// One outstanding request/response exchange.
pub trait Session: Send {
    /// Block until the session is terminal or `timeout` elapses.
    /// `None` waits for the queue's session timeout.
    fn wait_for_completion(&mut self, timeout: Option<Duration>) -> SessionState;

    fn state(&self) -> SessionState;

    /// Responses received so far, in arrival order.
    fn responses(&self) -> &[Response];

    /// Error the host attached to the request, if any.
    fn request_error(&self) -> Option<&RequestError>;
}

// ───────────────────────────────────────────────────────────────
// Event persistence (driven adapter: domain ↔ durable log)
// ───────────────────────────────────────────────────────────────

/// Durable event log, event-id source and subscription store.
///
/// One instance is shared by every host on the EGM.
pub trait EventStore: Send + Sync {
    /// Allocate the next global event id.  Ids are strictly increasing and
    /// never reused, even across restarts.
    fn next_event_id(&self) -> u64;

    /// Append a persisted event to the host's log, keeping at most
    /// `max_entries` entries (oldest dropped).
    fn add_event_log(
        &self,
        host_id: i32,
        event: &QueuedEvent,
        max_entries: usize,
    ) -> Result<(), StorageError>;

    /// Mark a persisted event as acknowledged by the host.
    fn acknowledge_event(&self, host_id: i32, event_id: u64) -> Result<(), StorageError>;

    /// Persisted events the host has not acknowledged, in log order.
    fn unsent_events(&self, host_id: i32) -> Result<Vec<QueuedEvent>, StorageError>;

    fn event_log(&self, host_id: i32) -> Result<Vec<EventLogEntry>, StorageError>;

    fn add_supported_events(
        &self,
        host_id: i32,
        events: &[SupportedEvent],
    ) -> Result<(), StorageError>;

    fn remove_supported_events(
        &self,
        host_id: i32,
        events: &[SupportedEvent],
    ) -> Result<(), StorageError>;

    fn supported_events(&self, host_id: i32) -> Result<Vec<SupportedEvent>, StorageError>;

    fn subscriptions(&self, host_id: i32) -> Result<Vec<EventSubscription>, StorageError>;

    /// Replace the host's stored subscriptions.
    fn save_subscriptions(
        &self,
        host_id: i32,
        subscriptions: &[EventSubscription],
    ) -> Result<(), StorageError>;

    fn remove_subscriptions(
        &self,
        host_id: i32,
        keys: &[SubscriptionKey],
    ) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Key/value storage (driven adapter: domain ↔ flash / disk)
// ───────────────────────────────────────────────────────────────

/// Namespaced blob storage backing the event store.
///
/// Writes MUST be atomic per key: a reader sees either the old or the
/// new blob, never a torn one.
pub trait KvStore: Send + Sync {
    /// Read a value.  `Ok(None)` when the key does not exist.
    fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Observers (driven adapter: domain → UI / telemetry)
// ───────────────────────────────────────────────────────────────

/// Receives every comms state and transport state change.
///
/// Called with the host's state-machine lock held: implementations must
/// not call back into the [`HostComms`](super::comms::HostComms) that
/// notified them.
pub trait CommsObserver: Send + Sync {
    fn notify(&self, notice: &CommsNotice);
}

/// Classifies session outcomes for a host, whoever issued the request.
pub trait SessionMonitor: Send + Sync {
    fn session_completed(&self, state: SessionState, error: Option<&RequestError>);
}
