//! Chunk protocol metrics.

use metrics::{Counter, Histogram};

/// Publisher metrics.
#[derive(Clone, Debug)]
pub(crate) struct PublishMetrics {
    /// Logical values published.
    pub(crate) publishes_total: Counter,
    /// Publishes aborted by a failed chunk put.
    pub(crate) publish_failures_total: Counter,
    /// Chunks written.
    pub(crate) chunks_put_total: Counter,
    /// Compressed size of published values.
    pub(crate) compressed_bytes: Histogram,
}

impl Default for PublishMetrics {
    fn default() -> Self {
        Self {
            publishes_total: metrics::counter!("chunk.publish.total"),
            publish_failures_total: metrics::counter!("chunk.publish.failures_total"),
            chunks_put_total: metrics::counter!("chunk.publish.chunks_total"),
            compressed_bytes: metrics::histogram!("chunk.publish.compressed_bytes"),
        }
    }
}

/// Fetcher metrics.
#[derive(Clone, Debug)]
pub(crate) struct FetchMetrics {
    /// Fetches started.
    pub(crate) fetches_total: Counter,
    /// Fetches that returned an error.
    pub(crate) fetch_failures_total: Counter,
    /// Fetches served from chunk 0 alone.
    pub(crate) single_chunk_total: Counter,
    /// Chunk lookups issued during retry rounds.
    pub(crate) chunk_retries_total: Counter,
    /// Parallel fetch rounds that hit the deadline.
    pub(crate) fetch_timeouts_total: Counter,
    /// Batch fetch rounds.
    pub(crate) batches_total: Counter,
}

impl Default for FetchMetrics {
    fn default() -> Self {
        Self {
            fetches_total: metrics::counter!("chunk.fetch.total"),
            fetch_failures_total: metrics::counter!("chunk.fetch.failures_total"),
            single_chunk_total: metrics::counter!("chunk.fetch.single_chunk_total"),
            chunk_retries_total: metrics::counter!("chunk.fetch.chunk_retries_total"),
            fetch_timeouts_total: metrics::counter!("chunk.fetch.timeouts_total"),
            batches_total: metrics::counter!("chunk.fetch.batches_total"),
        }
    }
}
