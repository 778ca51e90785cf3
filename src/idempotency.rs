use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::BridgeError;

/// Keys of transfers currently executing.
///
/// A key is held by an [`InFlightPermit`] and released when the permit is
/// dropped, whatever way the transfer ends.
#[derive(Debug, Default, Clone)]
pub struct InFlightSet {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, failing with [`BridgeError::AlreadyInFlight`] if another
    /// attempt holds it.
    pub fn acquire(&self, key: &str) -> Result<InFlightPermit, BridgeError> {
        let mut keys = self.keys.lock();
        if !keys.insert(key.to_string()) {
            debug!(key, "duplicate transfer rejected");
            return Err(BridgeError::AlreadyInFlight(key.to_string()));
        }
        Ok(InFlightPermit {
            key: key.to_string(),
            keys: self.keys.clone(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct InFlightPermit {
    key: String,
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlightPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}
