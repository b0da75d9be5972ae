//! Event report pipeline.
//!
//! Devices report occurrences to the [`EventHandlerRegistry`], which
//! stamps each with a global event id and fans it out to every host's
//! [`EventHandler`].  Each handler filters by subscription, queues under
//! its overflow policy, persists durable events and delivers in order on
//! its own thread.

mod handler;
pub mod queue;
mod registry;
pub mod report;
pub mod subscription;

pub use handler::EventHandler;
pub use queue::{EnqueueOutcome, EventQueue, merge_for_restart};
pub use registry::EventHandlerRegistry;
pub use report::{
    DeviceStatus, EventLogEntry, Meter, MeterScope, Occurrence, QueuedEvent, SupportedEvent,
    TransactionRecord,
};
pub use subscription::{EventReportConfig, EventSubscription, ReportConfigTable, SubscriptionKey};
