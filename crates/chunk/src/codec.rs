//! Chunk codec: compression, framing and integrity checks.
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! magic(4) | version(1) | total_chunks(4) | chunk_index(4) |
//! payload_size(4) | crc32(4) | [original_size(4), chunk 0 only] | payload
//! ```

use alloy_primitives::keccak256;
use bytes::{Buf, BufMut};
use strand_dht::DhtKey;

use crate::{
    CHUNK_FORMAT_VERSION, CHUNK_HEADER_SIZE, CHUNK_MAGIC, CHUNK_ZERO_HEADER_SIZE,
    COMPRESSION_LEVEL, ChunkError, ChunkResult, MAX_CHUNK_PAYLOAD, MAX_DECOMPRESSED_SIZE,
    MAX_TOTAL_CHUNKS,
};

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Number of chunks making up the value.
    pub total_chunks: u32,
    /// Position of this chunk, 0-based.
    pub chunk_index: u32,
    /// Length of this chunk's payload.
    pub payload_size: u32,
    /// CRC-32 of this chunk's payload.
    pub checksum: u32,
    /// Decompressed size of the whole value. Only chunk 0 carries it.
    pub original_size: Option<u32>,
}

impl ChunkHeader {
    /// Build the header for `payload` at `chunk_index`.
    ///
    /// `original_size` is recorded for chunk 0 and dropped for every other
    /// index.
    pub fn for_payload(
        total_chunks: u32,
        chunk_index: u32,
        original_size: u32,
        payload: &[u8],
    ) -> Self {
        Self {
            total_chunks,
            chunk_index,
            payload_size: payload.len() as u32,
            checksum: checksum(payload),
            original_size: (chunk_index == 0).then_some(original_size),
        }
    }

    /// Encoded header length.
    pub const fn encoded_len(&self) -> usize {
        if self.chunk_index == 0 {
            CHUNK_ZERO_HEADER_SIZE
        } else {
            CHUNK_HEADER_SIZE
        }
    }
}

/// CRC-32 (IEEE) of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Compress a logical value.
pub fn compress(data: &[u8]) -> ChunkResult<Vec<u8>> {
    zstd::bulk::compress(data, COMPRESSION_LEVEL)
        .map_err(|e| ChunkError::CompressionFailed(e.to_string()))
}

/// Decompress `compressed`, which must expand to exactly `expected_size` bytes.
///
/// `expected_size` comes from the network, so it is bounded before any buffer
/// is allocated.
pub fn decompress(compressed: &[u8], expected_size: usize) -> ChunkResult<Vec<u8>> {
    if expected_size == 0 || expected_size > MAX_DECOMPRESSED_SIZE {
        return Err(ChunkError::DecompressionFailed(format!(
            "declared size {expected_size} outside 1..={MAX_DECOMPRESSED_SIZE}"
        )));
    }

    let data = zstd::bulk::decompress(compressed, expected_size)
        .map_err(|e| ChunkError::DecompressionFailed(e.to_string()))?;

    if data.len() != expected_size {
        return Err(ChunkError::DecompressionFailed(format!(
            "expected {expected_size} bytes, got {}",
            data.len()
        )));
    }
    Ok(data)
}

/// Number of chunks needed for `compressed_len` bytes.
pub const fn chunk_count(compressed_len: usize) -> usize {
    compressed_len.div_ceil(MAX_CHUNK_PAYLOAD)
}

/// DHT key of chunk `index` of the value stored under `base_key`.
///
/// One-way: chunk keys cannot be found without knowing the base key.
pub fn derive_chunk_key(base_key: &str, index: u32) -> DhtKey {
    DhtKey(keccak256(format!("{base_key}:chunk:{index}").as_bytes()))
}

/// Frame `payload` behind `header`.
pub fn serialize_chunk(header: &ChunkHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header.encoded_len() + payload.len());
    buf.put_slice(&CHUNK_MAGIC);
    buf.put_u8(CHUNK_FORMAT_VERSION);
    buf.put_u32(header.total_chunks);
    buf.put_u32(header.chunk_index);
    buf.put_u32(header.payload_size);
    buf.put_u32(header.checksum);
    if header.chunk_index == 0 {
        buf.put_u32(header.original_size.unwrap_or_default());
    }
    buf.put_slice(payload);
    buf
}

/// Parse and validate a framed chunk.
///
/// Checks run in a fixed order and stop at the first failure: magic, version,
/// declared payload length, checksum, then index and size invariants. A header
/// is only returned once its payload checksum has been verified.
pub fn deserialize_chunk(wire: &[u8]) -> ChunkResult<(ChunkHeader, &[u8])> {
    if wire.len() < CHUNK_HEADER_SIZE {
        return Err(ChunkError::InvalidFraming(format!(
            "{} bytes is shorter than a chunk header",
            wire.len()
        )));
    }

    let mut buf = wire;
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != CHUNK_MAGIC {
        return Err(ChunkError::InvalidFraming(format!("bad magic {magic:02x?}")));
    }

    let version = buf.get_u8();
    if version != CHUNK_FORMAT_VERSION {
        return Err(ChunkError::InvalidFraming(format!(
            "unsupported format version {version}"
        )));
    }

    let total_chunks = buf.get_u32();
    let chunk_index = buf.get_u32();
    let payload_size = buf.get_u32();
    let stored_checksum = buf.get_u32();

    let original_size = if chunk_index == 0 {
        if buf.remaining() < 4 {
            return Err(ChunkError::InvalidFraming(
                "chunk 0 header truncated".to_string(),
            ));
        }
        Some(buf.get_u32())
    } else {
        None
    };

    if payload_size as usize > MAX_CHUNK_PAYLOAD || payload_size as usize != buf.remaining() {
        return Err(ChunkError::InvalidFraming(format!(
            "declared payload {payload_size} bytes, buffer holds {}",
            buf.remaining()
        )));
    }
    let payload = buf;

    let actual = checksum(payload);
    if actual != stored_checksum {
        return Err(ChunkError::ChecksumMismatch {
            index: chunk_index,
            expected: stored_checksum,
            actual,
        });
    }

    if total_chunks == 0 || total_chunks > MAX_TOTAL_CHUNKS || chunk_index >= total_chunks {
        return Err(ChunkError::InvalidFraming(format!(
            "chunk {chunk_index} of {total_chunks}"
        )));
    }
    if let Some(size) = original_size {
        if size == 0 || size as usize > MAX_DECOMPRESSED_SIZE {
            return Err(ChunkError::InvalidFraming(format!(
                "original size {size} out of range"
            )));
        }
    }

    let header = ChunkHeader {
        total_chunks,
        chunk_index,
        payload_size,
        checksum: stored_checksum,
        original_size,
    };
    Ok((header, payload))
}
