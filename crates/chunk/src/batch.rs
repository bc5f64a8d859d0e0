//! Batch fetch.
//!
//! Chunk 0 of every requested value is looked up in one [`Dht::get_batch`]
//! round. Values that fit in one chunk are finished from that round alone;
//! the rest continue through the regular fan-out and retry path, reusing the
//! chunk 0 already in hand.

use std::collections::HashMap;

use strand_dht::{Dht, DhtKey};
use tracing::debug;

use crate::{
    ChunkError, ChunkResult,
    codec::derive_chunk_key,
    fetcher::{ChunkedFetcher, FirstChunk},
};

impl<D: Dht + ?Sized> ChunkedFetcher<D> {
    /// Fetch several values, returning one result per base key in input order.
    ///
    /// If the shared chunk 0 round fails as a whole, every entry carries that
    /// error.
    pub async fn fetch_batch<S>(&self, base_keys: &[S]) -> Vec<ChunkResult<Vec<u8>>>
    where
        S: AsRef<str> + Sync,
    {
        if base_keys.is_empty() {
            return Vec::new();
        }
        self.metrics.batches_total.increment(1);
        self.metrics.fetches_total.increment(base_keys.len() as u64);

        let keys: Vec<DhtKey> = base_keys
            .iter()
            .map(|base_key| derive_chunk_key(base_key.as_ref(), 0))
            .collect();

        let round = match tokio::time::timeout(
            self.settings.request_timeout,
            self.dht.get_batch(&keys),
        )
        .await
        {
            Ok(Ok(round)) => round,
            Ok(Err(source)) => {
                return self.fail_all(base_keys.len(), ChunkError::DhtGetFailed { index: 0, source });
            }
            Err(_) => return self.fail_all(base_keys.len(), ChunkError::Timeout),
        };
        let found: HashMap<DhtKey, Vec<Vec<u8>>> = round.into_iter().collect();

        let mut results = Vec::with_capacity(base_keys.len());
        for (base_key, key) in base_keys.iter().zip(&keys) {
            let base_key = base_key.as_ref();
            let result = if base_key.is_empty() {
                Err(ChunkError::invalid_input("empty base key"))
            } else {
                let values = found.get(key).cloned().unwrap_or_default();
                match FirstChunk::select(values) {
                    Ok(first) => self.complete(base_key, first).await,
                    Err(err) => Err(err),
                }
            };

            if let Err(err) = &result {
                debug!(base_key, error = %err, "batch entry failed");
                self.metrics.fetch_failures_total.increment(1);
            }
            results.push(result);
        }
        results
    }

    fn fail_all(&self, len: usize, err: ChunkError) -> Vec<ChunkResult<Vec<u8>>> {
        debug!(keys = len, error = %err, "batch round failed");
        self.metrics.fetch_failures_total.increment(len as u64);
        vec![Err(err); len]
    }
}
