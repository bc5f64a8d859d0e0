//! Wire format and protocol constants.

use std::time::Duration;

/// Chunk framing sentinel.
pub const CHUNK_MAGIC: [u8; 4] = *b"SCHK";

/// Current chunk format version.
pub const CHUNK_FORMAT_VERSION: u8 = 1;

/// Header length of every chunk except chunk 0.
pub const CHUNK_HEADER_SIZE: usize = 21;

/// Header length of chunk 0, which also carries the original size.
pub const CHUNK_ZERO_HEADER_SIZE: usize = CHUNK_HEADER_SIZE + 4;

/// Maximum compressed payload bytes carried by one chunk.
///
/// Keeps a framed chunk plus the DHT's own envelope inside one value slot.
pub const MAX_CHUNK_PAYLOAD: usize = 45_000;

/// Largest logical value accepted, and the decompression bomb guard.
pub const MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// Largest chunk count a well-formed value can announce.
///
/// Derived from zstd's worst-case expansion of [`MAX_DECOMPRESSED_SIZE`].
pub const MAX_TOTAL_CHUNKS: u32 =
    (compress_bound(MAX_DECOMPRESSED_SIZE).div_ceil(MAX_CHUNK_PAYLOAD)) as u32;

/// zstd compression level used for publishing.
pub const COMPRESSION_LEVEL: i32 = 19;

/// Default deadline for a single DHT put or get.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for the parallel fetch of chunks `1..N`.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retry rounds for missing chunks.
pub const DHT_CHUNK_MAX_RETRIES: u32 = 3;

/// Default delay before each retry round.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default cap on concurrently outstanding chunk lookups.
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 32;

/// `ZSTD_COMPRESSBOUND`.
const fn compress_bound(src: usize) -> usize {
    let margin = if src < (128 << 10) {
        ((128 << 10) - src) >> 11
    } else {
        0
    };
    src + (src >> 8) + margin
}
