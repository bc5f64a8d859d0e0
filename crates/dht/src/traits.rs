//! The DHT contract.

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{DhtKey, DhtResult, ValueId};

/// A best-effort key/value network with bounded value slots.
///
/// All methods are single-shot: they either complete or fail, and callers
/// bound them with their own timeouts. Values returned by the `get` family are
/// application payloads, already unwrapped from their [`PackedValue`]
/// envelope.
///
/// [`PackedValue`]: crate::PackedValue
#[async_trait]
#[auto_impl(&, Arc)]
pub trait Dht: Send + Sync {
    /// Stable value id of the local publisher identity.
    ///
    /// Signed puts use this id so that republishing replaces earlier values.
    fn local_value_id(&self) -> ValueId;

    /// Store an unsigned value. Values accumulate at the key.
    async fn put(&self, key: &DhtKey, value: Vec<u8>, ttl_secs: u32) -> DhtResult<()>;

    /// Store a signed value, replacing any value sharing `value_id` at the key.
    async fn put_signed(
        &self,
        key: &DhtKey,
        value: Vec<u8>,
        value_id: ValueId,
        ttl_secs: u32,
    ) -> DhtResult<()>;

    /// Place already packed bytes back on the network as-is.
    ///
    /// Used to restore values after a restart without re-signing them.
    async fn republish(&self, key: &DhtKey, packed: &[u8]) -> DhtResult<()>;

    /// First value stored at `key`.
    async fn get(&self, key: &DhtKey) -> DhtResult<Option<Vec<u8>>> {
        Ok(self.get_all(key).await?.into_iter().next())
    }

    /// Every value stored at `key`.
    async fn get_all(&self, key: &DhtKey) -> DhtResult<Vec<Vec<u8>>>;

    /// Look up several keys in one round.
    ///
    /// The result holds one entry per requested key, in request order.
    async fn get_batch(&self, keys: &[DhtKey]) -> DhtResult<Vec<(DhtKey, Vec<Vec<u8>>)>> {
        let lookups = keys.iter().map(|key| async move {
            let values = self.get_all(key).await?;
            Ok::<_, crate::DhtError>((*key, values))
        });
        futures::future::try_join_all(lookups).await
    }
}

/// Hook called by a DHT node for every value it accepts into local storage.
///
/// Implementations receive the packed bytes exactly as stored.
#[auto_impl(&, Arc, Box)]
pub trait StoreObserver: Send + Sync {
    /// A value was stored locally under `key`.
    fn on_store(&self, key: &DhtKey, packed: &[u8]);
}
