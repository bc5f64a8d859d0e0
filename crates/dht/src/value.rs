//! Packed DHT values.

use serde::{Deserialize, Serialize};

use crate::{DhtResult, TtlClass, ValueId};

/// The wrapper a DHT node stores for every value.
///
/// Application payloads ride in `data`. Ownership and authentication are
/// attached by the publishing node and must survive republication
/// untouched, so anchor nodes keep the packed bytes rather than this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedValue {
    /// Slot identifier.
    pub id: ValueId,
    /// Owner public key, empty for unsigned values.
    pub owner: Vec<u8>,
    /// Signature over the value, empty for unsigned values.
    pub signature: Vec<u8>,
    /// Time-to-live in seconds, `0` for permanent.
    pub ttl_secs: u32,
    /// Unix timestamp of the original publication.
    pub created_at: u64,
    /// Application payload.
    pub data: Vec<u8>,
}

impl PackedValue {
    /// Serialize to the bytes placed on the DHT.
    pub fn pack(&self) -> DhtResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode packed bytes.
    pub fn unpack(bytes: &[u8]) -> DhtResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Read only the slot identifier from packed bytes.
    pub fn peek_id(bytes: &[u8]) -> DhtResult<ValueId> {
        let (id, _) = postcard::take_from_bytes::<ValueId>(bytes)?;
        Ok(id)
    }

    /// TTL class of this value.
    pub fn ttl_class(&self) -> TtlClass {
        TtlClass::from_secs(self.ttl_secs)
    }

    /// Whether the value carries owner authentication.
    pub fn is_signed(&self) -> bool {
        !self.owner.is_empty()
    }
}
