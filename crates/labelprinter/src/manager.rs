//! Explicit registry of open printer connections.
//!
//! Handles are keyed by normalized address, so `AA:BB:..` and `aabb..`
//! refer to the same printer. Each handle keeps its own lock; the manager
//! only owns the map.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::normalize_device_id;
use crate::link::Link;
use crate::transport::{ConnectionState, PeripheralHandle};

/// Address -> handle map with an explicit lifecycle.
pub struct ConnectionManager<L: Link> {
    handles: HashMap<String, Arc<PeripheralHandle<L>>>,
}

impl<L: Link> Default for ConnectionManager<L> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }
}

impl<L: Link> ConnectionManager<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected handle, returning the one it replaced.
    pub fn insert(&mut self, handle: PeripheralHandle<L>) -> Option<Arc<PeripheralHandle<L>>> {
        let key = normalize_device_id(handle.address());
        tracing::debug!(address = %handle.address(), "Registered connection");
        self.handles.insert(key, Arc::new(handle))
    }

    /// Handle for `address`, if one is registered and still connected.
    pub fn get(&self, address: &str) -> Option<Arc<PeripheralHandle<L>>> {
        self.handles
            .get(&normalize_device_id(address))
            .filter(|h| h.state() == ConnectionState::Connected)
            .cloned()
    }

    /// Drop the entry for `address` without touching the link.
    pub fn remove(&mut self, address: &str) -> Option<Arc<PeripheralHandle<L>>> {
        self.handles.remove(&normalize_device_id(address))
    }

    /// Disconnect and forget `address`. Returns whether it was registered.
    pub async fn disconnect(&mut self, address: &str) -> bool {
        match self.remove(address) {
            Some(handle) => {
                handle.disconnect().await;
                true
            }
            None => false,
        }
    }

    pub async fn disconnect_all(&mut self) {
        let handles: Vec<_> = self.handles.drain().map(|(_, h)| h).collect();
        tracing::info!(count = handles.len(), "Disconnecting all printers");
        for handle in handles {
            handle.disconnect().await;
        }
    }

    /// Forget handles whose link has been lost.
    pub fn prune(&mut self) -> usize {
        let before = self.handles.len();
        self.handles
            .retain(|_, h| h.state() == ConnectionState::Connected);
        before - self.handles.len()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.handles
            .values()
            .map(|h| h.address().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
