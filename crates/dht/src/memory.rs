//! In-process DHT for tests and local development.
//!
//! [`MemoryDht`] honours the replacement semantics of the real network and
//! adds knobs to simulate the failures the chunk protocol has to absorb:
//! propagation lag (scheduled misses), slow keys, failing puts and corrupted
//! payloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::keccak256;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::{
    Dht, DhtError, DhtKey, DhtResult, PackedValue, StoreObserver, ValueId,
    current_unix_timestamp,
};

/// In-memory DHT with fault injection.
pub struct MemoryDht {
    owner_id: ValueId,
    values: RwLock<HashMap<DhtKey, Vec<Vec<u8>>>>,
    observer: RwLock<Option<Arc<dyn StoreObserver>>>,
    misses: Mutex<HashMap<DhtKey, usize>>,
    delays: Mutex<HashMap<DhtKey, Duration>>,
    put_budget: Mutex<Option<usize>>,
    next_unsigned_id: AtomicUsize,
    puts: AtomicUsize,
    gets: AtomicUsize,
    batch_gets: AtomicUsize,
}

impl MemoryDht {
    /// Create an empty DHT whose local identity publishes with `owner_id`.
    pub fn new(owner_id: ValueId) -> Self {
        Self {
            owner_id,
            values: RwLock::new(HashMap::new()),
            observer: RwLock::new(None),
            misses: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            put_budget: Mutex::new(None),
            next_unsigned_id: AtomicUsize::new(1),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            batch_gets: AtomicUsize::new(0),
        }
    }

    /// Install the hook called for every locally stored value.
    pub fn set_store_observer(&self, observer: Arc<dyn StoreObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Make the next `count` lookups of `key` come back empty.
    pub fn miss_next(&self, key: DhtKey, count: usize) {
        self.misses.lock().insert(key, count);
    }

    /// Delay every lookup of `key`.
    pub fn delay_key(&self, key: DhtKey, delay: Duration) {
        self.delays.lock().insert(key, delay);
    }

    /// Let `count` more puts succeed, then reject every further put.
    pub fn fail_puts_after(&self, count: usize) {
        *self.put_budget.lock() = Some(count);
    }

    /// Rewrite the payload of every value at `key`.
    pub fn tamper(&self, key: &DhtKey, f: impl Fn(&mut Vec<u8>)) {
        let mut values = self.values.write();
        let Some(slot) = values.get_mut(key) else {
            return;
        };
        for packed in slot.iter_mut() {
            if let Ok(mut value) = PackedValue::unpack(packed) {
                f(&mut value.data);
                if let Ok(repacked) = value.pack() {
                    *packed = repacked;
                }
            }
        }
    }

    /// Packed bytes stored at `key`.
    pub fn packed_values(&self, key: &DhtKey) -> Vec<Vec<u8>> {
        self.values.read().get(key).cloned().unwrap_or_default()
    }

    /// Number of keys holding at least one value.
    pub fn key_count(&self) -> usize {
        self.values.read().values().filter(|v| !v.is_empty()).count()
    }

    /// Number of successful puts (signed, unsigned and republished).
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of single-key lookups served.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of batch lookups served.
    pub fn batch_get_count(&self) -> usize {
        self.batch_gets.load(Ordering::Relaxed)
    }

    fn consume_put_budget(&self) -> DhtResult<()> {
        let mut budget = self.put_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(DhtError::Rejected("put budget exhausted".into())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Store packed bytes, replacing any value with the same id.
    fn store(&self, key: &DhtKey, packed: Vec<u8>) -> DhtResult<()> {
        let id = PackedValue::peek_id(&packed)?;
        {
            let mut values = self.values.write();
            let slot = values.entry(*key).or_default();
            slot.retain(|existing| PackedValue::peek_id(existing).ok() != Some(id));
            slot.push(packed.clone());
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
        trace!(%key, id, "stored value");

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_store(key, &packed);
        }
        Ok(())
    }

    async fn lookup(&self, key: &DhtKey) -> Vec<Vec<u8>> {
        let delay = self.delays.lock().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut misses = self.misses.lock();
            if let Some(remaining) = misses.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Vec::new();
                }
            }
        }

        self.values
            .read()
            .get(key)
            .map(|slot| {
                slot.iter()
                    .filter_map(|packed| PackedValue::unpack(packed).ok())
                    .map(|value| value.data)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn seal(&self, value: &[u8], id: ValueId) -> Vec<u8> {
        let mut preimage = Vec::with_capacity(value.len() + 8);
        preimage.extend_from_slice(&id.to_be_bytes());
        preimage.extend_from_slice(value);
        keccak256(&preimage).to_vec()
    }
}

#[async_trait]
impl Dht for MemoryDht {
    fn local_value_id(&self) -> ValueId {
        self.owner_id
    }

    async fn put(&self, key: &DhtKey, value: Vec<u8>, ttl_secs: u32) -> DhtResult<()> {
        self.consume_put_budget()?;
        let id = self.next_unsigned_id.fetch_add(1, Ordering::Relaxed) as ValueId;
        let packed = PackedValue {
            id,
            owner: Vec::new(),
            signature: Vec::new(),
            ttl_secs,
            created_at: current_unix_timestamp(),
            data: value,
        }
        .pack()?;
        self.store(key, packed)
    }

    async fn put_signed(
        &self,
        key: &DhtKey,
        value: Vec<u8>,
        value_id: ValueId,
        ttl_secs: u32,
    ) -> DhtResult<()> {
        self.consume_put_budget()?;
        let packed = PackedValue {
            id: value_id,
            owner: self.owner_id.to_be_bytes().to_vec(),
            signature: self.seal(&value, value_id),
            ttl_secs,
            created_at: current_unix_timestamp(),
            data: value,
        }
        .pack()?;
        self.store(key, packed)
    }

    async fn republish(&self, key: &DhtKey, packed: &[u8]) -> DhtResult<()> {
        self.consume_put_budget()?;
        self.store(key, packed.to_vec())
    }

    async fn get_all(&self, key: &DhtKey) -> DhtResult<Vec<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.lookup(key).await)
    }

    async fn get_batch(&self, keys: &[DhtKey]) -> DhtResult<Vec<(DhtKey, Vec<Vec<u8>>)>> {
        self.batch_gets.fetch_add(1, Ordering::Relaxed);
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push((*key, self.lookup(key).await));
        }
        Ok(results)
    }
}
