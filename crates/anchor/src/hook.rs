//! Routes values accepted by the local DHT node into the persistent store.

use std::sync::Arc;

use strand_dht::{DhtKey, StoreObserver};
use tracing::{trace, warn};

use crate::{PersistentStore, StoreError};

/// [`StoreObserver`] that persists every value the local node stores.
///
/// Register one with the DHT node at startup. Values outside the store's
/// persist-worthy TTL classes are filtered by the store itself.
#[derive(Debug, Clone)]
pub struct AnchorHook {
    store: Arc<PersistentStore>,
}

impl AnchorHook {
    /// Create a hook writing into `store`.
    pub const fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// The store this hook writes into.
    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }
}

impl StoreObserver for AnchorHook {
    fn on_store(&self, key: &DhtKey, packed: &[u8]) {
        match self.store.put_packed(key, packed) {
            Ok(()) => {}
            Err(StoreError::Closed) => trace!(%key, "store closed, value not persisted"),
            Err(err) => warn!(%key, error = %err, "failed to persist stored value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AnchorArgs;
    use strand_dht::{Dht, MemoryDht};
    use tempfile::tempdir;

    #[test]
    fn test_garbage_is_not_propagated() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            PersistentStore::open(dir.path().join("anchor.redb"), &AnchorArgs::default()).unwrap(),
        );
        AnchorHook::new(store.clone()).on_store(&DhtKey::from_name("bad"), &[0xff, 0xff]);
        assert_eq!(store.stats().unwrap().errors, 1);
    }

    #[tokio::test]
    async fn test_hook_persists_long_lived_values_only() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            PersistentStore::open(dir.path().join("anchor.redb"), &AnchorArgs::default()).unwrap(),
        );
        let dht = MemoryDht::new(7);
        dht.set_store_observer(Arc::new(AnchorHook::new(store.clone())));

        let year = 365 * 24 * 3600;
        let key = DhtKey::from_name("profile");
        dht.put_signed(&key, b"keep".to_vec(), 7, year).await.unwrap();
        dht.put_signed(&DhtKey::from_name("status"), b"drop".to_vec(), 7, 60)
            .await
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.filtered, 1);

        let records = store.get(&key).unwrap();
        assert_eq!(records[0].packed_value, dht.packed_values(&key)[0]);
    }
}
