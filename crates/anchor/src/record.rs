//! Stored value records and their on-disk encoding.

use serde::{Deserialize, Serialize};
use strand_dht::{DhtKey, PackedValue, TtlClass, ValueId, current_unix_timestamp};

use crate::{StoreError, StoreResult};

/// A DHT value kept by an anchor node.
///
/// Identity is `(key, value_id)`. `packed_value` holds the exact bytes seen on
/// the DHT, authentication included, and is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValueRecord {
    /// DHT key the value lives under.
    pub key: DhtKey,
    /// Slot identifier within the key.
    pub value_id: ValueId,
    /// Packed value bytes.
    pub packed_value: Vec<u8>,
    /// TTL class of the value.
    pub ttl_class: TtlClass,
    /// Unix timestamp of the original publication.
    pub created_at: u64,
    /// Unix timestamp after which the record may be dropped, `0` for never.
    pub expires_at: u64,
}

impl StoredValueRecord {
    /// Build a record from packed DHT bytes.
    ///
    /// A value without a creation time is treated as created now.
    pub fn from_packed(key: DhtKey, packed: &[u8]) -> StoreResult<Self> {
        let value = PackedValue::unpack(packed)
            .map_err(|e| StoreError::InvalidRecord(format!("undecodable packed value: {e}")))?;
        let created_at = match value.created_at {
            0 => current_unix_timestamp(),
            ts => ts,
        };
        let ttl_class = value.ttl_class();
        Ok(Self {
            key,
            value_id: value.id,
            packed_value: packed.to_vec(),
            ttl_class,
            created_at,
            expires_at: ttl_class.expires_at(created_at, value.ttl_secs),
        })
    }

    /// Whether the record has expired at `now`.
    pub const fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    pub(crate) fn body(&self) -> RecordBody {
        RecordBody {
            packed_value: self.packed_value.clone(),
            ttl_class: self.ttl_class.as_u8(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    pub(crate) fn from_row(key: [u8; 32], value_id: ValueId, body: RecordBody) -> StoreResult<Self> {
        let ttl_class = TtlClass::from_u8(body.ttl_class).ok_or_else(|| {
            StoreError::InvalidRecord(format!("unknown ttl class {}", body.ttl_class))
        })?;
        Ok(Self {
            key: DhtKey::new(key),
            value_id,
            packed_value: body.packed_value,
            ttl_class,
            created_at: body.created_at,
            expires_at: body.expires_at,
        })
    }
}

/// Row value of the current table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecordBody {
    pub(crate) packed_value: Vec<u8>,
    pub(crate) ttl_class: u8,
    pub(crate) created_at: u64,
    pub(crate) expires_at: u64,
}

impl RecordBody {
    pub(crate) fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Row value of the legacy table, keyed by `(key, created_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LegacyRecordBody {
    pub(crate) packed_value: Vec<u8>,
    pub(crate) ttl_class: u8,
    pub(crate) expires_at: u64,
}

impl LegacyRecordBody {
    pub(crate) fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    #[cfg(test)]
    pub(crate) fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }
}
