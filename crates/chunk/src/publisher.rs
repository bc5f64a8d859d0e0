//! Chunked publisher.

use std::sync::Arc;

use strand_dht::Dht;
use tracing::{debug, warn};

use crate::{
    ChunkConfig, ChunkError, ChunkHeader, ChunkResult, MAX_CHUNK_PAYLOAD, MAX_DECOMPRESSED_SIZE,
    codec::{chunk_count, compress, derive_chunk_key, serialize_chunk},
    config::ChunkSettings,
    metrics::PublishMetrics,
};

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Number of chunks written.
    pub total_chunks: u32,
    /// Size of the compressed value.
    pub compressed_size: usize,
}

/// Splits logical values into chunks and writes them to the DHT.
///
/// Every chunk is stored with a signed put under the local identity's value
/// id, so publishing to the same base key again replaces the previous chunks
/// instead of accumulating next to them.
///
/// Publishing is not atomic. The first failed put aborts the publish and the
/// chunks written before it stay on the network. Publishing again is safe and
/// is the way to recover.
pub struct ChunkedPublisher<D: ?Sized> {
    dht: Arc<D>,
    settings: ChunkSettings,
    metrics: PublishMetrics,
}

impl<D: Dht + ?Sized> ChunkedPublisher<D> {
    /// Create a publisher writing through `dht`.
    pub fn new(dht: Arc<D>, config: &impl ChunkConfig) -> Self {
        Self {
            dht,
            settings: ChunkSettings::from_config(config),
            metrics: PublishMetrics::default(),
        }
    }

    /// Publish `data` under `base_key` with a TTL of `ttl_secs`.
    pub async fn publish(&self, base_key: &str, data: &[u8], ttl_secs: u32) -> ChunkResult<()> {
        self.publish_with_receipt(base_key, data, ttl_secs).await.map(|_| ())
    }

    /// Publish and report how the value was split.
    pub async fn publish_with_receipt(
        &self,
        base_key: &str,
        data: &[u8],
        ttl_secs: u32,
    ) -> ChunkResult<PublishReceipt> {
        if base_key.is_empty() {
            return Err(ChunkError::invalid_input("empty base key"));
        }
        if data.is_empty() {
            return Err(ChunkError::invalid_input("empty value"));
        }
        if data.len() > MAX_DECOMPRESSED_SIZE {
            return Err(ChunkError::invalid_input(format!(
                "value of {} bytes exceeds {MAX_DECOMPRESSED_SIZE}",
                data.len()
            )));
        }

        let compressed = compress(data)?;
        let total_chunks = chunk_count(compressed.len()) as u32;
        let original_size = data.len() as u32;
        let value_id = self.dht.local_value_id();
        self.metrics.compressed_bytes.record(compressed.len() as f64);

        debug!(
            base_key,
            original_size,
            compressed_size = compressed.len(),
            total_chunks,
            "publishing chunked value"
        );

        for (index, payload) in compressed.chunks(MAX_CHUNK_PAYLOAD).enumerate() {
            let index = index as u32;
            let header = ChunkHeader::for_payload(total_chunks, index, original_size, payload);
            let wire = serialize_chunk(&header, payload);
            let key = derive_chunk_key(base_key, index);

            let put = self.dht.put_signed(&key, wire, value_id, ttl_secs);
            let result = match tokio::time::timeout(self.settings.request_timeout, put).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(ChunkError::DhtPutFailed { index, source }),
                Err(_) => Err(ChunkError::Timeout),
            };

            if let Err(err) = result {
                warn!(base_key, index, total_chunks, error = %err, "chunk put failed, aborting publish");
                self.metrics.publish_failures_total.increment(1);
                return Err(err);
            }
            self.metrics.chunks_put_total.increment(1);
        }

        self.metrics.publishes_total.increment(1);
        Ok(PublishReceipt {
            total_chunks,
            compressed_size: compressed.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkArgs, codec::deserialize_chunk, test_utils::noise};
    use assert_matches::assert_matches;
    use strand_dht::{DhtError, MemoryDht};

    fn publisher(dht: &Arc<MemoryDht>) -> ChunkedPublisher<MemoryDht> {
        ChunkedPublisher::new(dht.clone(), &ChunkArgs::default())
    }

    #[tokio::test]
    async fn test_rejects_empty_input() {
        let dht = Arc::new(MemoryDht::new(1));
        let publisher = publisher(&dht);

        assert_matches!(
            publisher.publish("", b"data", 60).await,
            Err(ChunkError::NullOrInvalidInput { .. })
        );
        assert_matches!(
            publisher.publish("key", b"", 60).await,
            Err(ChunkError::NullOrInvalidInput { .. })
        );
        assert_eq!(dht.put_count(), 0);
    }

    #[tokio::test]
    async fn test_small_value_is_one_chunk() {
        let dht = Arc::new(MemoryDht::new(1));
        let receipt = publisher(&dht)
            .publish_with_receipt("small", &[42u8; 200], 60)
            .await
            .unwrap();

        assert_eq!(receipt.total_chunks, 1);
        assert_eq!(dht.put_count(), 1);

        let stored = dht.get(&derive_chunk_key("small", 0)).await.unwrap().unwrap();
        let (header, _) = deserialize_chunk(&stored).unwrap();
        assert_eq!(header.original_size, Some(200));
        assert_eq!(header.total_chunks, 1);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_without_rollback() {
        let dht = Arc::new(MemoryDht::new(1));
        // Noise does not compress, forcing several chunks.
        let data = noise(3 * MAX_CHUNK_PAYLOAD);
        dht.fail_puts_after(1);

        let err = publisher(&dht).publish("big", &data, 60).await.unwrap_err();
        assert_matches!(
            err,
            ChunkError::DhtPutFailed { index: 1, source: DhtError::Rejected(_) }
        );

        // Chunk 0 stays published; nothing else was attempted after the failure.
        assert_eq!(dht.put_count(), 1);
        assert!(dht.get(&derive_chunk_key("big", 0)).await.unwrap().is_some());
        assert!(dht.get(&derive_chunk_key("big", 2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_republish_replaces_chunks() {
        let dht = Arc::new(MemoryDht::new(9));
        let publisher = publisher(&dht);

        publisher.publish("profile", b"first version", 60).await.unwrap();
        publisher.publish("profile", b"second version", 60).await.unwrap();

        let values = dht.get_all(&derive_chunk_key("profile", 0)).await.unwrap();
        assert_eq!(values.len(), 1);
        let (header, _) = deserialize_chunk(&values[0]).unwrap();
        assert_eq!(header.original_size, Some(b"second version".len() as u32));
    }
}
