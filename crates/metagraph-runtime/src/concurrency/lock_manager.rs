//! Keyed lock handles.
//!
//! [`LockManager`] hands out one `Arc<Mutex<()>>` per key. The first
//! request for a key creates the handle under the map's shard lock, so two
//! threads racing on a new key still receive the same mutex. Handles are
//! never removed; the manager itself never locks them.

use std::hash::Hash;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

/// A shared mutex guarding whatever its key names.
pub type LockHandle = Arc<Mutex<()>>;

pub struct LockManager<K> {
    handles: DashMap<K, LockHandle>,
}

impl<K: Eq + Hash> LockManager<K> {
    pub fn new() -> Self {
        LockManager {
            handles: DashMap::new(),
        }
    }

    /// The handle for `key`, created on first use.
    pub fn lock_for(&self, key: K) -> LockHandle {
        self.handles
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Number of keys ever requested.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<K: Eq + Hash> Default for LockManager<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> std::fmt::Debug for LockManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("keys", &self.handles.len())
            .finish()
    }
}

/// Whether two handles are the same mutex.
pub fn same_handle(a: &LockHandle, b: &LockHandle) -> bool {
    Arc::ptr_eq(a, b)
}
