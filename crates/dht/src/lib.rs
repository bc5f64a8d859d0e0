//! DHT collaborator contract for the strand storage engine.
//!
//! The chunked storage protocol and the anchor store never talk to a concrete
//! DHT implementation. They depend on the [`Dht`] trait defined here, which
//! models a best-effort key/value network with bounded value slots and
//! per-value TTLs.
//!
//! This crate also owns the types that both sides agree on:
//!
//! - [`DhtKey`]: 32-byte key every value is addressed by.
//! - [`ValueId`]: slot identifier used for signed replacement.
//! - [`TtlClass`]: TTL buckets that decide whether a value is persist-worthy.
//! - [`PackedValue`]: the binary wrapper actually placed on the DHT.
//! - [`StoreObserver`]: hook a DHT node calls for every value it accepts.
//!
//! With the `test-utils` feature, [`MemoryDht`] provides an in-process
//! implementation with fault injection.

mod error;
mod key;
mod traits;
mod ttl;
mod value;

#[cfg(any(test, feature = "test-utils"))]
mod memory;

pub use error::{DhtError, DhtResult};
pub use key::{DhtKey, ValueId};
pub use traits::{Dht, StoreObserver};
pub use ttl::TtlClass;
pub use value::PackedValue;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryDht;

/// Returns the current Unix timestamp in seconds.
#[inline]
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
