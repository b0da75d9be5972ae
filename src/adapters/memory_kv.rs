//! In-memory key/value backend.
//!
//! Implements [`KvStore`] over a `HashMap` keyed by `"namespace::key"`.
//! Used by the simulator and tests; a flash or file backend implements the
//! same port.  Writes can be made to fail on demand to exercise the
//! pipeline's tolerance of storage faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::app::ports::KvStore;
use crate::error::StorageError;

#[derive(Default)]
pub struct MemoryKv {
    store: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// Make every subsequent write and delete fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .store
            .lock()
            .get(&Self::composite_key(namespace, key))
            .cloned())
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::WriteFailed);
        }
        self.store
            .lock()
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::DeleteFailed);
        }
        self.store.lock().remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .lock()
            .contains_key(&Self::composite_key(namespace, key))
    }
}
