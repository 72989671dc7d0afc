//! Response cache: byte-budgeted LRU store, cacheable-entry model,
//! cross-encoding transcoder, and the persistence sidecar.

pub mod entry;
pub mod persist;
pub mod store;
pub mod transcode;

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::errors::GatewayError;
use store::CacheStore;

/// Holder for the process-wide cache. Initialized exactly once at startup
/// and handed explicitly to the components that need it; querying it before
/// initialization is a `CacheAbsent` error rather than a panic.
#[derive(Default)]
pub struct CacheSlot(OnceCell<Arc<CacheStore>>);

impl CacheSlot {
    pub const fn new() -> Self {
        Self(OnceCell::new())
    }

    /// Installs the store. Returns the rejected store if already initialized.
    pub fn initialize(&self, store: Arc<CacheStore>) -> Result<(), Arc<CacheStore>> {
        self.0.set(store)
    }

    pub fn get(&self) -> Result<Arc<CacheStore>, GatewayError> {
        self.0
            .get()
            .map(Arc::clone)
            .ok_or(GatewayError::CacheAbsent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::CacheConfig;

    #[test]
    fn test_uninitialized_slot_is_cache_absent() {
        let slot = CacheSlot::new();
        assert!(matches!(slot.get(), Err(GatewayError::CacheAbsent)));
    }

    #[test]
    fn test_initialize_once() {
        let slot = CacheSlot::new();
        let store = Arc::new(CacheStore::new(CacheConfig::with_max_bytes(1024)));
        assert!(slot.initialize(Arc::clone(&store)).is_ok());
        assert!(slot.get().is_ok());
        // Second initialization is rejected.
        let other = Arc::new(CacheStore::new(CacheConfig::with_max_bytes(2048)));
        assert!(slot.initialize(other).is_err());
        assert_eq!(slot.get().unwrap().max_bytes(), 1024);
    }
}
