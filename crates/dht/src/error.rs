//! DHT error types.

/// Errors surfaced by a [`Dht`](crate::Dht) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DhtError {
    /// The operation did not complete in time.
    #[error("dht operation timed out")]
    Timeout,

    /// The network refused the value (size, quota, signature).
    #[error("value rejected: {0}")]
    Rejected(String),

    /// Transport level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A packed value could not be decoded.
    #[error("malformed value: {0}")]
    MalformedValue(String),
}

impl From<postcard::Error> for DhtError {
    fn from(err: postcard::Error) -> Self {
        DhtError::MalformedValue(err.to_string())
    }
}

/// Result type for DHT operations.
pub type DhtResult<T> = core::result::Result<T, DhtError>;
