//! Chunk protocol configuration.
//!
//! [`ChunkConfig`] names what the publisher and fetcher need; [`ChunkArgs`]
//! implements it straight from the command line or a config file.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_PARALLEL_FETCHES, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RETRY_DELAY, DHT_CHUNK_MAX_RETRIES,
};

/// Timing and fan-out parameters of the chunk protocol.
pub trait ChunkConfig {
    /// Deadline for one DHT put or get.
    fn request_timeout(&self) -> Duration;

    /// Deadline for collecting chunks `1..N` in parallel.
    fn fetch_timeout(&self) -> Duration;

    /// Retry rounds for chunks still missing after the parallel fetch.
    fn max_retries(&self) -> u32;

    /// Pause before each retry round.
    fn retry_delay(&self) -> Duration;

    /// Upper bound on concurrently outstanding chunk lookups.
    fn max_parallel_fetches(&self) -> usize;
}

/// Chunk protocol arguments.
#[derive(Debug, Args, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Chunked Storage")]
#[serde(default)]
pub struct ChunkArgs {
    /// Deadline for a single DHT put or get, in milliseconds.
    #[arg(long = "chunk.request-timeout-ms", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_millis() as u64)]
    pub request_timeout_ms: u64,

    /// Deadline for the parallel chunk fetch, in milliseconds.
    #[arg(long = "chunk.fetch-timeout-ms", default_value_t = DEFAULT_FETCH_TIMEOUT.as_millis() as u64)]
    pub fetch_timeout_ms: u64,

    /// Retry rounds for missing chunks.
    #[arg(long = "chunk.max-retries", default_value_t = DHT_CHUNK_MAX_RETRIES)]
    pub max_retries: u32,

    /// Delay before each retry round, in milliseconds.
    #[arg(long = "chunk.retry-delay-ms", default_value_t = DEFAULT_RETRY_DELAY.as_millis() as u64)]
    pub retry_delay_ms: u64,

    /// Maximum concurrent chunk lookups per fetch.
    #[arg(long = "chunk.max-parallel-fetches", default_value_t = DEFAULT_MAX_PARALLEL_FETCHES)]
    pub max_parallel_fetches: usize,
}

impl Default for ChunkArgs {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
            max_retries: DHT_CHUNK_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
        }
    }
}

impl ChunkConfig for ChunkArgs {
    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn max_parallel_fetches(&self) -> usize {
        self.max_parallel_fetches.max(1)
    }
}

/// Resolved settings captured by the publisher and fetcher at construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkSettings {
    pub(crate) request_timeout: Duration,
    pub(crate) fetch_timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) max_parallel_fetches: usize,
}

impl ChunkSettings {
    pub(crate) fn from_config(config: &impl ChunkConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            fetch_timeout: config.fetch_timeout(),
            max_retries: config.max_retries(),
            retry_delay: config.retry_delay(),
            max_parallel_fetches: config.max_parallel_fetches().max(1),
        }
    }
}
