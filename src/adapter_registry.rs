use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::traits::ProtocolAdapter;
use crate::types::{ChainId, Protocol};

pub type DynProtocolAdapter = dyn ProtocolAdapter;

/// Errors that can occur when working with the adapter registry
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterRegistryError {
    /// Adapter for the protocol already exists
    AdapterAlreadyExists(Protocol),
    /// No adapter registered for the protocol
    AdapterNotFound(Protocol),
}

impl fmt::Display for AdapterRegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterAlreadyExists(protocol) => {
                write!(f, "Adapter for {} already exists", protocol)
            }
            Self::AdapterNotFound(protocol) => {
                write!(f, "No adapter found for {}", protocol)
            }
        }
    }
}

impl std::error::Error for AdapterRegistryError {}

/// Thread-safe registry of protocol adapters, iterated in protocol
/// declaration order.
pub struct AdapterRegistry {
    adapters: RwLock<BTreeMap<Protocol, Arc<DynProtocolAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `adapter` under its own protocol.
    ///
    /// Returns an error if that protocol already has an adapter
    pub async fn register_adapter(&self, adapter: Arc<DynProtocolAdapter>) -> Result<(), AdapterRegistryError> {
        let protocol = adapter.protocol();
        let mut adapters = self.adapters.write().await;

        if adapters.contains_key(&protocol) {
            return Err(AdapterRegistryError::AdapterAlreadyExists(protocol));
        }

        adapters.insert(protocol, adapter);
        Ok(())
    }

    /// Registers or replaces the adapter for its protocol, returning the
    /// previous one
    pub async fn register_or_update_adapter(&self, adapter: Arc<DynProtocolAdapter>) -> Option<Arc<DynProtocolAdapter>> {
        let mut adapters = self.adapters.write().await;
        adapters.insert(adapter.protocol(), adapter)
    }

    pub async fn get_adapter(&self, protocol: Protocol) -> Result<Arc<DynProtocolAdapter>, AdapterRegistryError> {
        let adapters = self.adapters.read().await;
        adapters
            .get(&protocol)
            .cloned()
            .ok_or(AdapterRegistryError::AdapterNotFound(protocol))
    }

    pub async fn has_adapter(&self, protocol: Protocol) -> bool {
        self.adapters.read().await.contains_key(&protocol)
    }

    pub async fn remove_adapter(&self, protocol: Protocol) -> Option<Arc<DynProtocolAdapter>> {
        self.adapters.write().await.remove(&protocol)
    }

    pub async fn list_protocols(&self) -> Vec<Protocol> {
        self.adapters.read().await.keys().copied().collect()
    }

    pub async fn count(&self) -> usize {
        self.adapters.read().await.len()
    }

    /// Adapters whose route check accepts `source -> destination`, in
    /// declaration order.
    pub async fn supporting(&self, source: ChainId, destination: ChainId) -> Vec<Arc<DynProtocolAdapter>> {
        self.adapters
            .read()
            .await
            .values()
            .filter(|adapter| adapter.supports(source, destination))
            .cloned()
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &"<opaque>")
            .finish()
    }
}
