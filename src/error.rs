use thiserror::Error;

/// Failures reported by an [`EmbeddingProvider`](crate::EmbeddingProvider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// The provider could not be reached (network, timeout, 5xx after retries).
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    /// The provider refused the input (4xx, content policy, too long).
    #[error("embedding provider rejected input: {0}")]
    Rejected(String),
    /// The provider answered, but not with something we can read as vectors.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    /// Provider settings are inconsistent (missing URL, zero dimension).
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced by the store, its backends and the query engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// A vector's length disagrees with the store's configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// The persistence layer failed or could not be reached.
    /// A vector holds NaN or an infinity and cannot be ranked.
    #[error("invalid vector: {0}")]
    InvalidVector(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("record encode error: {0}")]
    Encode(String),
    #[error("record decode error: {0}")]
    Decode(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("configuration error: {0}")]
    Config(String),
    /// Aggregate signal for callers that treat any per-document failure as fatal.
    #[error("{failed} of {total} documents failed to ingest")]
    PartialIngest { failed: usize, total: usize },
}

impl StoreError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn config<E: std::fmt::Display>(err: E) -> Self {
        Self::Config(err.to_string())
    }

    /// Validates `actual` against the configured dimension.
    pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), StoreError> {
        if expected == actual {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch { expected, actual })
        }
    }

    pub(crate) fn check_finite(values: &[f32]) -> Result<(), StoreError> {
        match values.iter().position(|v| !v.is_finite()) {
            None => Ok(()),
            Some(i) => Err(StoreError::InvalidVector(format!(
                "component {i} is {}",
                values[i]
            ))),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}
