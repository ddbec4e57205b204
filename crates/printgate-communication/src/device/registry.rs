//! Device name to live connection cache
//!
//! At most one live connection exists per device name. While a connection is
//! being established its slot holds a `Connecting` marker, so a concurrent
//! caller for the same name gets [`TransportError::Connecting`] instead of
//! opening a second link.

use parking_lot::Mutex;
use printgate_core::{Result, TransportError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug)]
enum CacheSlot<H> {
    Connecting,
    Live(Arc<H>),
}

/// Cache of live connections keyed by device name
#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    slots: Mutex<HashMap<String, CacheSlot<H>>>,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes a `Connecting` marker unless disarmed
struct SlotGuard<'a, H> {
    registry: &'a ConnectionRegistry<H>,
    name: &'a str,
    armed: bool,
}

impl<H> Drop for SlotGuard<'_, H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.registry.slots.lock();
        if matches!(slots.get(self.name), Some(CacheSlot::Connecting)) {
            slots.remove(self.name);
        }
    }
}

impl<H> ConnectionRegistry<H> {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Live connection for `name`, if any
    pub fn get(&self, name: &str) -> Option<Arc<H>> {
        match self.slots.lock().get(name) {
            Some(CacheSlot::Live(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// True while a connect for `name` is in progress
    pub fn is_connecting(&self, name: &str) -> bool {
        matches!(self.slots.lock().get(name), Some(CacheSlot::Connecting))
    }

    /// Return the live connection or establish one with `connect`
    ///
    /// If `connect` fails, or the returned future is dropped before it
    /// finishes, the slot is freed for the next caller.
    pub async fn get_or_connect<F, Fut>(&self, name: &str, connect: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<H>>>,
    {
        {
            let mut slots = self.slots.lock();
            match slots.get(name) {
                Some(CacheSlot::Live(handle)) => return Ok(handle.clone()),
                Some(CacheSlot::Connecting) => {
                    return Err(TransportError::Connecting {
                        device: name.to_string(),
                    }
                    .into())
                }
                None => {
                    slots.insert(name.to_string(), CacheSlot::Connecting);
                }
            }
        }

        let mut guard = SlotGuard {
            registry: self,
            name,
            armed: true,
        };
        let handle = connect().await?;
        self.slots
            .lock()
            .insert(name.to_string(), CacheSlot::Live(handle.clone()));
        guard.armed = false;
        Ok(handle)
    }

    /// Forget the connection for `name`, returning it if it was live
    pub fn remove(&self, name: &str) -> Option<Arc<H>> {
        match self.slots.lock().remove(name) {
            Some(CacheSlot::Live(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Names with a live connection
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, CacheSlot::Live(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove and return every live connection
    pub fn drain(&self) -> Vec<Arc<H>> {
        self.slots
            .lock()
            .drain()
            .filter_map(|(_, slot)| match slot {
                CacheSlot::Live(handle) => Some(handle),
                CacheSlot::Connecting => None,
            })
            .collect()
    }
}
