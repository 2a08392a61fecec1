//! Shared distributed stores, keyed by configuration.
//!
//! The registry is created by the application and handed to whatever needs
//! a store. Asking twice for the same key returns the same store until it is
//! removed or closed.

use crate::distributed::DistributedStoreManager;
use crate::{Result, SliceError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: Mutex<HashMap<String, Arc<DistributedStoreManager>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<DistributedStoreManager>>> {
        match self.stores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the store registered under `key`, opening it with `open` when
    /// there is none or the registered one was closed.
    pub fn get_or_open<F>(&self, key: &str, open: F) -> Result<Arc<DistributedStoreManager>>
    where
        F: FnOnce() -> Result<DistributedStoreManager>,
    {
        let mut stores = self.lock();
        if let Some(store) = stores.get(key) {
            if !store.is_closed() {
                return Ok(Arc::clone(store));
            }
            tracing::debug!(key, "Replacing closed store");
        }
        let store = Arc::new(open()?);
        stores.insert(key.to_string(), Arc::clone(&store));
        tracing::info!(key, "Store registered");
        Ok(store)
    }

    pub fn get(&self, key: &str) -> Option<Arc<DistributedStoreManager>> {
        self.lock().get(key).filter(|s| !s.is_closed()).cloned()
    }

    /// Unregisters a store without closing it.
    pub fn remove(&self, key: &str) -> Option<Arc<DistributedStoreManager>> {
        self.lock().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes and unregisters every store, returning the failures by key.
    pub fn close_all(&self) -> Vec<(String, SliceError)> {
        let stores: Vec<(String, Arc<DistributedStoreManager>)> = self.lock().drain().collect();
        let mut failures = Vec::new();
        for (key, store) in stores {
            if let Err(e) = store.close() {
                tracing::warn!(key = %key, error = %e, "Failed to close store");
                failures.push((key, e));
            }
        }
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        failures
    }
}
