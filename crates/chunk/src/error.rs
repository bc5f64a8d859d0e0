//! Chunk protocol error types.

use strand_dht::DhtError;

/// Errors from chunk encoding, publishing and fetching.
///
/// Fetch paths surface the most specific error they hit; they never fall back
/// to returning partially assembled data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChunkError {
    /// Caller supplied an empty key, empty data or an oversized value.
    #[error("invalid input: {reason}")]
    NullOrInvalidInput {
        /// Why the input was refused.
        reason: String,
    },

    /// Compressing the logical value failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression failed, produced the wrong size or hit the size guard.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Storing a chunk failed; chunks before `index` may already be live.
    #[error("failed to put chunk {index}: {source}")]
    DhtPutFailed {
        /// Index of the chunk whose put failed.
        index: u32,
        /// Underlying DHT error.
        source: DhtError,
    },

    /// Looking up a chunk failed at the DHT layer.
    #[error("failed to get chunk {index}: {source}")]
    DhtGetFailed {
        /// Index of the chunk being fetched.
        index: u32,
        /// Underlying DHT error.
        source: DhtError,
    },

    /// No value exists under the requested key.
    #[error("value not found")]
    NotFound,

    /// Header framing is wrong: magic, version, lengths or indices.
    #[error("invalid chunk framing: {0}")]
    InvalidFraming(String),

    /// Payload checksum does not match the header.
    #[error("checksum mismatch on chunk {index}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Index of the corrupt chunk.
        index: u32,
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// Chunks were still missing after every retry round.
    #[error("incomplete value: {} of {total} chunks missing", missing.len())]
    Incomplete {
        /// Indices that never arrived.
        missing: Vec<u32>,
        /// Total chunks announced by chunk 0.
        total: u32,
    },

    /// A DHT call did not finish within its deadline.
    #[error("dht operation timed out")]
    Timeout,

    /// The reassembly buffer could not be allocated.
    #[error("failed to allocate {requested} bytes")]
    AllocationFailed {
        /// Requested buffer size.
        requested: usize,
    },
}

impl ChunkError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::NullOrInvalidInput {
            reason: reason.into(),
        }
    }

    /// Whether the error means the data itself is bad rather than unavailable.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidFraming(_) | Self::ChecksumMismatch { .. } | Self::DecompressionFailed(_)
        )
    }
}

/// Result type for chunk operations.
pub type ChunkResult<T> = core::result::Result<T, ChunkError>;
