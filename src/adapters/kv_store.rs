//! Event persistence manager over a key/value backend.
//!
//! Implements [`EventStore`] with `postcard` blobs in the `events`
//! namespace:
//!
//! | Key               | Value                                  |
//! |-------------------|----------------------------------------|
//! | `last_id`         | last event id issued (`u64`)           |
//! | `log.{host}`      | `Vec<EventLogEntry>`, oldest first     |
//! | `subs.{host}`     | `Vec<EventSubscription>`               |
//! | `supported.{host}`| `Vec<SupportedEvent>`, sorted          |
//!
//! Every mutation is written through; reads are served from a cache that
//! is filled from the backend the first time a host is touched.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{EventStore, KvStore};
use crate::error::StorageError;
use crate::event_handler::report::{EventLogEntry, QueuedEvent, SupportedEvent};
use crate::event_handler::subscription::{EventSubscription, SubscriptionKey};

const NAMESPACE: &str = "events";
const LAST_ID_KEY: &str = "last_id";

#[derive(Default)]
struct Cache {
    last_id: u64,
    logs: HashMap<i32, Vec<EventLogEntry>>,
    subscriptions: HashMap<i32, Vec<EventSubscription>>,
    supported: HashMap<i32, BTreeSet<SupportedEvent>>,
}

pub struct KvEventStore {
    kv: Arc<dyn KvStore>,
    cache: Mutex<Cache>,
}

impl KvEventStore {
    /// Open the store, seeding the event-id counter from the backend.
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self, StorageError> {
        let last_id = match kv.read(NAMESPACE, LAST_ID_KEY)? {
            Some(bytes) => postcard::from_bytes::<u64>(&bytes)?,
            None => 0,
        };
        info!("KvEventStore: opened, last event id {}", last_id);
        Ok(Self {
            kv,
            cache: Mutex::new(Cache {
                last_id,
                ..Cache::default()
            }),
        })
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StorageError> {
        match self.kv.read(NAMESPACE, key)? {
            Some(bytes) => Ok(postcard::from_bytes(&bytes)?),
            None => Ok(T::default()),
        }
    }

    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(value)?;
        self.kv.write(NAMESPACE, key, &bytes)
    }

    fn with_log<R>(
        &self,
        host_id: i32,
        write: bool,
        f: impl FnOnce(&mut Vec<EventLogEntry>) -> R,
    ) -> Result<R, StorageError> {
        let mut cache = self.cache.lock();
        let key = format!("log.{}", host_id);
        if !cache.logs.contains_key(&host_id) {
            let loaded: Vec<EventLogEntry> = self.load(&key)?;
            cache.logs.insert(host_id, loaded);
        }
        let log = cache.logs.entry(host_id).or_default();
        let out = f(log);
        if write {
            self.save(&key, log)?;
        }
        Ok(out)
    }

    fn with_supported<R>(
        &self,
        host_id: i32,
        write: bool,
        f: impl FnOnce(&mut BTreeSet<SupportedEvent>) -> R,
    ) -> Result<R, StorageError> {
        let mut cache = self.cache.lock();
        let key = format!("supported.{}", host_id);
        if !cache.supported.contains_key(&host_id) {
            let loaded: Vec<SupportedEvent> = self.load(&key)?;
            cache.supported.insert(host_id, loaded.into_iter().collect());
        }
        let set = cache.supported.entry(host_id).or_default();
        let out = f(set);
        if write {
            let list: Vec<&SupportedEvent> = set.iter().collect();
            self.save(&key, &list)?;
        }
        Ok(out)
    }

    fn with_subscriptions<R>(
        &self,
        host_id: i32,
        write: bool,
        f: impl FnOnce(&mut Vec<EventSubscription>) -> R,
    ) -> Result<R, StorageError> {
        let mut cache = self.cache.lock();
        let key = format!("subs.{}", host_id);
        if !cache.subscriptions.contains_key(&host_id) {
            let loaded: Vec<EventSubscription> = self.load(&key)?;
            cache.subscriptions.insert(host_id, loaded);
        }
        let subs = cache.subscriptions.entry(host_id).or_default();
        let out = f(subs);
        if write {
            self.save(&key, subs)?;
        }
        Ok(out)
    }
}

impl EventStore for KvEventStore {
    fn next_event_id(&self) -> u64 {
        let mut cache = self.cache.lock();
        cache.last_id += 1;
        let id = cache.last_id;
        if let Err(e) = self.save(LAST_ID_KEY, &id) {
            warn!("KvEventStore: event id {} not persisted: {}", id, e);
        }
        id
    }

    fn add_event_log(
        &self,
        host_id: i32,
        event: &QueuedEvent,
        max_entries: usize,
    ) -> Result<(), StorageError> {
        self.with_log(host_id, true, |log| {
            log.push(EventLogEntry {
                event: event.clone(),
                acknowledged: false,
            });
            let excess = log.len().saturating_sub(max_entries.max(1));
            if excess > 0 {
                log.drain(..excess);
            }
        })
    }

    fn acknowledge_event(&self, host_id: i32, event_id: u64) -> Result<(), StorageError> {
        let found = self.with_log(host_id, true, |log| {
            log.iter_mut()
                .find(|e| e.event.event_id == event_id)
                .map(|e| e.acknowledged = true)
                .is_some()
        })?;
        if !found {
            debug!("KvEventStore: ack for #{} not in host {} log", event_id, host_id);
        }
        Ok(())
    }

    fn unsent_events(&self, host_id: i32) -> Result<Vec<QueuedEvent>, StorageError> {
        self.with_log(host_id, false, |log| {
            log.iter()
                .filter(|e| !e.acknowledged)
                .map(|e| e.event.clone())
                .collect()
        })
    }

    fn event_log(&self, host_id: i32) -> Result<Vec<EventLogEntry>, StorageError> {
        self.with_log(host_id, false, |log| log.clone())
    }

    fn add_supported_events(
        &self,
        host_id: i32,
        events: &[SupportedEvent],
    ) -> Result<(), StorageError> {
        self.with_supported(host_id, true, |set| set.extend(events.iter().cloned()))
    }

    fn remove_supported_events(
        &self,
        host_id: i32,
        events: &[SupportedEvent],
    ) -> Result<(), StorageError> {
        self.with_supported(host_id, true, |set| {
            for e in events {
                set.remove(e);
            }
        })
    }

    fn supported_events(&self, host_id: i32) -> Result<Vec<SupportedEvent>, StorageError> {
        self.with_supported(host_id, false, |set| set.iter().cloned().collect())
    }

    fn subscriptions(&self, host_id: i32) -> Result<Vec<EventSubscription>, StorageError> {
        self.with_subscriptions(host_id, false, |subs| subs.clone())
    }

    fn save_subscriptions(
        &self,
        host_id: i32,
        subscriptions: &[EventSubscription],
    ) -> Result<(), StorageError> {
        self.with_subscriptions(host_id, true, |subs| *subs = subscriptions.to_vec())
    }

    fn remove_subscriptions(
        &self,
        host_id: i32,
        keys: &[SubscriptionKey],
    ) -> Result<(), StorageError> {
        self.with_subscriptions(host_id, true, |subs| subs.retain(|s| !keys.contains(&s.key())))
    }
}
