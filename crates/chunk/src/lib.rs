//! Chunked storage over a bounded-slot DHT.
//!
//! A DHT value slot holds at most [`MAX_CHUNK_PAYLOAD`] bytes of payload. Larger
//! values are compressed, split into chunks, and written under keys derived
//! from a caller-chosen base key:
//!
//! ```text
//! chunk key = keccak256("{base_key}:chunk:{index}")
//! ```
//!
//! Chunk 0 carries the chunk count and the decompressed size, so a reader can
//! plan the rest of the fetch after a single lookup.
//!
//! - [`ChunkedPublisher`] compresses, frames and writes chunks.
//! - [`ChunkedFetcher`] reads them back, concurrently, with retries for chunks
//!   that have not propagated yet. [`ChunkedFetcher::fetch_batch`] resolves
//!   many values while sharing one DHT round for their chunk 0.

mod codec;
mod config;
mod constants;
mod error;
mod metrics;

mod batch;
mod fetcher;
mod publisher;

pub use codec::{
    ChunkHeader, checksum, chunk_count, compress, decompress, derive_chunk_key, deserialize_chunk,
    serialize_chunk,
};
pub use config::{ChunkArgs, ChunkConfig};
pub use constants::*;
pub use error::{ChunkError, ChunkResult};
pub use fetcher::ChunkedFetcher;
pub use publisher::{ChunkedPublisher, PublishReceipt};

#[cfg(test)]
pub(crate) mod test_utils {
    /// Deterministic incompressible bytes.
    pub(crate) fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }
}
