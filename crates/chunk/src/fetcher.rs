//! Chunked fetcher.
//!
//! Reassembly runs in three phases:
//!
//! 1. Chunk 0 is fetched on its own. It is the only chunk that tells how many
//!    chunks exist and how large the decompressed value is.
//! 2. Chunks `1..N` are fetched concurrently through a bounded stream. The
//!    whole phase shares one deadline; lookups still running at the deadline
//!    are dropped.
//! 3. Whatever is still missing is retried sequentially for a few rounds, to
//!    ride out propagation lag in the DHT.
//!
//! Decompression only starts once every slot holds a validated payload.

use std::sync::Arc;

use futures::StreamExt;
use strand_dht::Dht;
use tracing::{debug, trace, warn};

use crate::{
    ChunkConfig, ChunkError, ChunkHeader, ChunkResult,
    codec::{decompress, derive_chunk_key, deserialize_chunk},
    config::ChunkSettings,
    metrics::FetchMetrics,
};

/// Reassembles logical values from their chunks.
pub struct ChunkedFetcher<D: ?Sized> {
    pub(crate) dht: Arc<D>,
    pub(crate) settings: ChunkSettings,
    pub(crate) metrics: FetchMetrics,
}

/// Validated chunk 0 of a value.
#[derive(Debug)]
pub(crate) struct FirstChunk {
    pub(crate) total_chunks: u32,
    pub(crate) original_size: usize,
    pub(crate) payload: Vec<u8>,
}

impl FirstChunk {
    /// Pick chunk 0 out of the values stored at its key.
    pub(crate) fn select(values: Vec<Vec<u8>>) -> ChunkResult<Self> {
        let (header, payload) = select_chunk(values, 0, None)?;
        let original_size = header.original_size.ok_or_else(|| {
            ChunkError::InvalidFraming("chunk 0 carries no original size".to_string())
        })?;
        Ok(Self {
            total_chunks: header.total_chunks,
            original_size: original_size as usize,
            payload,
        })
    }
}

/// Pick the first value at a chunk key that validates as chunk `index`.
///
/// Several owners may have written to the same key. When no value validates,
/// the error of the last candidate is returned.
fn select_chunk(
    values: Vec<Vec<u8>>,
    index: u32,
    expected_total: Option<u32>,
) -> ChunkResult<(ChunkHeader, Vec<u8>)> {
    let mut last_err = ChunkError::NotFound;
    for wire in &values {
        let (header, payload) = match deserialize_chunk(wire) {
            Ok(parsed) => parsed,
            Err(err) => {
                last_err = err;
                continue;
            }
        };
        if header.chunk_index != index {
            last_err = ChunkError::InvalidFraming(format!(
                "expected chunk {index}, found chunk {}",
                header.chunk_index
            ));
            continue;
        }
        if let Some(total) = expected_total {
            if header.total_chunks != total {
                last_err = ChunkError::InvalidFraming(format!(
                    "chunk {index} announces {} chunks, chunk 0 announced {total}",
                    header.total_chunks
                ));
                continue;
            }
        }
        return Ok((header, payload.to_vec()));
    }
    Err(last_err)
}

/// State of one chunk position during reassembly.
#[derive(Debug)]
enum Slot {
    Pending,
    Received(Vec<u8>),
    Failed(ChunkError),
}

/// Chunk slots owned by a single fetch call.
#[derive(Debug)]
struct Slots {
    total: u32,
    slots: Vec<Slot>,
}

impl Slots {
    fn new(first: FirstChunk) -> Self {
        let mut slots = Vec::with_capacity(first.total_chunks as usize);
        slots.push(Slot::Received(first.payload));
        slots.resize_with(first.total_chunks as usize, || Slot::Pending);
        Self {
            total: first.total_chunks,
            slots,
        }
    }

    /// Record a lookup result.
    ///
    /// A received payload is never overwritten, and a corruption error is only
    /// replaced by a payload or another corruption error.
    fn fill(&mut self, index: u32, result: ChunkResult<Vec<u8>>) {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return;
        };
        match (&*slot, &result) {
            (Slot::Received(_), _) => return,
            (Slot::Failed(seen), Err(err)) if seen.is_corruption() && !err.is_corruption() => {
                trace!(index, error = %err, kept = %seen, "chunk lookup failed");
                return;
            }
            _ => {}
        }
        *slot = match result {
            Ok(payload) => Slot::Received(payload),
            Err(err) => {
                trace!(index, error = %err, "chunk lookup failed");
                Slot::Failed(err)
            }
        };
    }

    /// Indices without a received payload.
    fn outstanding(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !matches!(slot, Slot::Received(_)))
            .map(|(index, _)| index as u32)
            .collect()
    }

    /// Concatenate payloads in index order.
    ///
    /// Corruption anywhere wins over missing chunks.
    fn into_compressed(self) -> ChunkResult<Vec<u8>> {
        let mut missing = Vec::new();
        let mut len = 0usize;
        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Received(payload) => len += payload.len(),
                Slot::Failed(err) if err.is_corruption() => return Err(err.clone()),
                Slot::Failed(_) | Slot::Pending => missing.push(index as u32),
            }
        }
        if !missing.is_empty() {
            return Err(ChunkError::Incomplete {
                missing,
                total: self.total,
            });
        }

        let mut compressed = Vec::new();
        compressed
            .try_reserve_exact(len)
            .map_err(|_| ChunkError::AllocationFailed { requested: len })?;
        for slot in self.slots {
            if let Slot::Received(payload) = slot {
                compressed.extend_from_slice(&payload);
            }
        }
        Ok(compressed)
    }
}

impl<D: Dht + ?Sized> ChunkedFetcher<D> {
    /// Create a fetcher reading through `dht`.
    pub fn new(dht: Arc<D>, config: &impl ChunkConfig) -> Self {
        Self {
            dht,
            settings: ChunkSettings::from_config(config),
            metrics: FetchMetrics::default(),
        }
    }

    /// Fetch and reassemble the value stored under `base_key`.
    pub async fn fetch(&self, base_key: &str) -> ChunkResult<Vec<u8>> {
        if base_key.is_empty() {
            return Err(ChunkError::invalid_input("empty base key"));
        }
        self.metrics.fetches_total.increment(1);

        let result = async {
            let values = self.lookup(base_key, 0).await?;
            let first = FirstChunk::select(values)?;
            self.complete(base_key, first).await
        }
        .await;

        if let Err(err) = &result {
            debug!(base_key, error = %err, "fetch failed");
            self.metrics.fetch_failures_total.increment(1);
        }
        result
    }

    /// Finish a fetch once chunk 0 is known.
    pub(crate) async fn complete(&self, base_key: &str, first: FirstChunk) -> ChunkResult<Vec<u8>> {
        let original_size = first.original_size;
        if first.total_chunks == 1 {
            self.metrics.single_chunk_total.increment(1);
            return decompress(&first.payload, original_size);
        }

        let mut slots = Slots::new(first);
        self.fetch_parallel(base_key, &mut slots).await;
        self.retry_outstanding(base_key, &mut slots).await;

        let compressed = slots.into_compressed()?;
        decompress(&compressed, original_size)
    }

    /// Fetch chunks `1..N` concurrently until all land or the deadline passes.
    async fn fetch_parallel(&self, base_key: &str, slots: &mut Slots) {
        let total = slots.total;
        let mut lookups = futures::stream::iter(1..total)
            .map(|index| async move { (index, self.fetch_chunk(base_key, index, total).await) })
            .buffer_unordered(self.settings.max_parallel_fetches);

        let deadline = tokio::time::Instant::now() + self.settings.fetch_timeout;
        loop {
            match tokio::time::timeout_at(deadline, lookups.next()).await {
                Ok(Some((index, result))) => slots.fill(index, result),
                Ok(None) => break,
                Err(_) => {
                    self.metrics.fetch_timeouts_total.increment(1);
                    warn!(
                        base_key,
                        total,
                        outstanding = slots.outstanding().len(),
                        "parallel chunk fetch timed out"
                    );
                    break;
                }
            }
        }
    }

    /// Retry every slot without a payload, sequentially, a bounded number of
    /// rounds.
    async fn retry_outstanding(&self, base_key: &str, slots: &mut Slots) {
        for round in 1..=self.settings.max_retries {
            let outstanding = slots.outstanding();
            if outstanding.is_empty() {
                return;
            }
            debug!(base_key, round, missing = outstanding.len(), "retrying chunks");
            tokio::time::sleep(self.settings.retry_delay).await;

            for index in outstanding {
                self.metrics.chunk_retries_total.increment(1);
                let result = self.fetch_chunk(base_key, index, slots.total).await;
                slots.fill(index, result);
            }
        }
    }

    /// Fetch and validate one non-zero chunk.
    async fn fetch_chunk(&self, base_key: &str, index: u32, total: u32) -> ChunkResult<Vec<u8>> {
        let values = self.lookup(base_key, index).await?;
        let (_, payload) = select_chunk(values, index, Some(total))?;
        Ok(payload)
    }

    /// All values at the key of chunk `index`, bounded by the request timeout.
    async fn lookup(&self, base_key: &str, index: u32) -> ChunkResult<Vec<Vec<u8>>> {
        let key = derive_chunk_key(base_key, index);
        match tokio::time::timeout(self.settings.request_timeout, self.dht.get_all(&key)).await {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(source)) => Err(ChunkError::DhtGetFailed { index, source }),
            Err(_) => Err(ChunkError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CHUNK_HEADER_SIZE, ChunkArgs, ChunkedPublisher, MAX_CHUNK_PAYLOAD, codec::chunk_count,
        codec::compress, test_utils::noise,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use strand_dht::{DhtKey, DhtResult, MemoryDht, ValueId};

    fn fast_args() -> ChunkArgs {
        ChunkArgs {
            request_timeout_ms: 500,
            fetch_timeout_ms: 1_000,
            max_retries: 3,
            retry_delay_ms: 10,
            max_parallel_fetches: 8,
        }
    }

    async fn publish(dht: &Arc<MemoryDht>, key: &str, data: &[u8]) -> u32 {
        ChunkedPublisher::new(dht.clone(), &fast_args())
            .publish_with_receipt(key, data, 3600)
            .await
            .unwrap()
            .total_chunks
    }

    fn fetcher(dht: &Arc<MemoryDht>) -> ChunkedFetcher<MemoryDht> {
        ChunkedFetcher::new(dht.clone(), &fast_args())
    }

    #[tokio::test]
    async fn test_not_found() {
        let dht = Arc::new(MemoryDht::new(1));
        assert_matches!(fetcher(&dht).fetch("missing").await, Err(ChunkError::NotFound));
    }

    #[tokio::test]
    async fn test_single_chunk_skips_fan_out() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = vec![b'x'; 200];
        assert_eq!(publish(&dht, "tiny", &data).await, 1);

        let fetched = fetcher(&dht).fetch("tiny").await.unwrap();
        assert_eq!(fetched, data);
        assert_eq!(dht.get_count(), 1);
    }

    #[tokio::test]
    async fn test_multi_chunk_roundtrip() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = noise(5 * MAX_CHUNK_PAYLOAD / 2);
        let total = publish(&dht, "blob", &data).await;
        assert_eq!(total as usize, chunk_count(compress(&data).unwrap().len()));
        assert!(total >= 3);

        assert_eq!(fetcher(&dht).fetch("blob").await.unwrap(), data);
        assert_eq!(dht.get_count(), total as usize);
    }

    #[tokio::test]
    async fn test_arrival_order_does_not_matter() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = noise(4 * MAX_CHUNK_PAYLOAD);
        let total = publish(&dht, "ordered", &data).await;

        // Lower indices answer last.
        for index in 1..total {
            let delay = Duration::from_millis(20 * u64::from(total - index));
            dht.delay_key(derive_chunk_key("ordered", index), delay);
        }

        assert_eq!(fetcher(&dht).fetch("ordered").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_corrupt_chunk_is_detected() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = noise(3 * MAX_CHUNK_PAYLOAD);
        publish(&dht, "corrupt", &data).await;

        dht.tamper(&derive_chunk_key("corrupt", 2), |wire| wire[CHUNK_HEADER_SIZE + 17] ^= 0x10);

        assert_matches!(
            fetcher(&dht).fetch("corrupt").await,
            Err(ChunkError::ChecksumMismatch { index: 2, .. })
        );
    }

    #[tokio::test]
    async fn test_transient_misses_are_retried() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = noise(3 * MAX_CHUNK_PAYLOAD);
        let total = publish(&dht, "laggy", &data).await;

        dht.miss_next(derive_chunk_key("laggy", 1), 2);
        dht.miss_next(derive_chunk_key("laggy", 2), 1);

        assert_eq!(fetcher(&dht).fetch("laggy").await.unwrap(), data);
        // Chunk 1 needed two retries, chunk 2 one.
        assert_eq!(dht.get_count(), total as usize + 3);
    }

    #[tokio::test]
    async fn test_missing_chunk_is_incomplete() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = noise(3 * MAX_CHUNK_PAYLOAD);
        let total = publish(&dht, "lost", &data).await;

        dht.miss_next(derive_chunk_key("lost", 1), usize::MAX);

        let err = fetcher(&dht).fetch("lost").await.unwrap_err();
        assert_matches!(err, ChunkError::Incomplete { ref missing, total: t } if *missing == vec![1] && t == total);
    }

    #[tokio::test]
    async fn test_slow_chunks_time_out_then_fail() {
        let dht = Arc::new(MemoryDht::new(1));
        let data = noise(3 * MAX_CHUNK_PAYLOAD);
        publish(&dht, "slow", &data).await;
        dht.delay_key(derive_chunk_key("slow", 1), Duration::from_secs(30));

        let fetcher = ChunkedFetcher::new(
            dht.clone(),
            &ChunkArgs {
                request_timeout_ms: 50,
                fetch_timeout_ms: 100,
                max_retries: 1,
                retry_delay_ms: 1,
                max_parallel_fetches: 4,
            },
        );
        assert_matches!(
            fetcher.fetch("slow").await,
            Err(ChunkError::Incomplete { missing, .. }) if missing == vec![1]
        );
    }

    #[tokio::test]
    async fn test_mismatched_total_is_rejected() {
        let dht = Arc::new(MemoryDht::new(1));
        let first = noise(3 * MAX_CHUNK_PAYLOAD);
        let second = noise(5 * MAX_CHUNK_PAYLOAD);
        publish(&dht, "mixed", &second).await;

        // Overwrite only chunk 0 with the header of a shorter value.
        let other = Arc::new(MemoryDht::new(1));
        publish(&other, "mixed", &first).await;
        let chunk_zero = other.packed_values(&derive_chunk_key("mixed", 0));
        dht.republish(&derive_chunk_key("mixed", 0), &chunk_zero[0])
            .await
            .unwrap();

        assert_matches!(
            fetcher(&dht).fetch("mixed").await,
            Err(ChunkError::InvalidFraming(_))
        );
    }

    #[test]
    fn test_slots_prefer_corruption_over_missing() {
        let mut slots = Slots::new(FirstChunk {
            total_chunks: 3,
            original_size: 10,
            payload: vec![1],
        });
        slots.fill(1, Err(ChunkError::NotFound));
        slots.fill(
            2,
            Err(ChunkError::ChecksumMismatch {
                index: 2,
                expected: 1,
                actual: 2,
            }),
        );
        assert_matches!(
            slots.into_compressed(),
            Err(ChunkError::ChecksumMismatch { index: 2, .. })
        );
    }

    /// Serves one corrupted copy of a chunk, then loses it.
    struct CorruptThenGone {
        inner: Arc<MemoryDht>,
        key: DhtKey,
        served: AtomicBool,
    }

    #[async_trait]
    impl Dht for CorruptThenGone {
        fn local_value_id(&self) -> ValueId {
            self.inner.local_value_id()
        }

        async fn put(&self, key: &DhtKey, value: Vec<u8>, ttl_secs: u32) -> DhtResult<()> {
            self.inner.put(key, value, ttl_secs).await
        }

        async fn put_signed(
            &self,
            key: &DhtKey,
            value: Vec<u8>,
            value_id: ValueId,
            ttl_secs: u32,
        ) -> DhtResult<()> {
            self.inner.put_signed(key, value, value_id, ttl_secs).await
        }

        async fn republish(&self, key: &DhtKey, packed: &[u8]) -> DhtResult<()> {
            self.inner.republish(key, packed).await
        }

        async fn get_all(&self, key: &DhtKey) -> DhtResult<Vec<Vec<u8>>> {
            let mut values = self.inner.get_all(key).await?;
            if *key != self.key {
                return Ok(values);
            }
            if self.served.swap(true, Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            for wire in &mut values {
                wire[CHUNK_HEADER_SIZE + 17] ^= 0x01;
            }
            Ok(values)
        }
    }

    #[tokio::test]
    async fn test_corruption_survives_later_misses() {
        let inner = Arc::new(MemoryDht::new(1));
        let data = noise(4 * MAX_CHUNK_PAYLOAD);
        let total = publish(&inner, "p", &data).await;
        assert!(total >= 3);

        let dht = Arc::new(CorruptThenGone {
            inner,
            key: derive_chunk_key("p", 2),
            served: AtomicBool::new(false),
        });
        let fetcher = ChunkedFetcher::new(dht, &fast_args());
        assert_matches!(
            fetcher.fetch("p").await,
            Err(ChunkError::ChecksumMismatch { index: 2, .. })
        );
    }

    #[test]
    fn test_slots_keep_corruption_over_later_misses() {
        let mut slots = Slots::new(FirstChunk {
            total_chunks: 2,
            original_size: 10,
            payload: vec![1],
        });
        slots.fill(
            1,
            Err(ChunkError::ChecksumMismatch {
                index: 1,
                expected: 1,
                actual: 2,
            }),
        );
        slots.fill(1, Err(ChunkError::NotFound));
        slots.fill(1, Err(ChunkError::Timeout));
        assert_eq!(slots.outstanding(), vec![1]);
        assert_matches!(
            slots.into_compressed(),
            Err(ChunkError::ChecksumMismatch { index: 1, .. })
        );
    }

    #[test]
    fn test_slots_accept_payload_after_corruption() {
        let mut slots = Slots::new(FirstChunk {
            total_chunks: 2,
            original_size: 10,
            payload: vec![1],
        });
        slots.fill(1, Err(ChunkError::InvalidFraming("bad magic".into())));
        slots.fill(1, Ok(vec![2]));
        assert_eq!(slots.into_compressed().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_slots_never_overwrite_received() {
        let mut slots = Slots::new(FirstChunk {
            total_chunks: 2,
            original_size: 10,
            payload: vec![1],
        });
        slots.fill(1, Ok(vec![2]));
        slots.fill(1, Err(ChunkError::Timeout));
        slots.fill(7, Ok(vec![9]));
        assert_eq!(slots.into_compressed().unwrap(), vec![1, 2]);
    }
}
