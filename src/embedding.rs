//! Embedding providers: the injected capability that turns a document into a
//! vector.
//!
//! The store only ever calls [`EmbeddingProvider::embed`] for ids it does not
//! already hold. Two providers ship with the crate:
//!
//! - [`HashEmbedder`]: deterministic, hash-seeded vectors for tests, demos and
//!   offline runs.
//! - [`ApiEmbedder`] (feature `api`): HTTP JSON endpoints (OpenAI-compatible,
//!   Hugging Face inference, or a custom service) with bounded retries.

use crate::error::EmbeddingError;
use crate::types::Metadata;
use async_trait::async_trait;

#[cfg(feature = "api")]
pub mod api;
pub mod hash;
pub mod retry;

#[cfg(feature = "api")]
pub use api::{ApiConfig, ApiEmbedder, ApiProviderKind};
pub use hash::HashEmbedder;
pub use retry::RetryConfig;

/// Computes fixed-length vectors for document content.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one document. The returned vector should have
    /// [`dimension`](Self::dimension) entries; the store rejects it otherwise.
    async fn embed(&self, content: &str, metadata: &Metadata) -> Result<Vec<f32>, EmbeddingError>;

    fn dimension(&self) -> usize;

    /// Identifier used in logs.
    fn name(&self) -> &str;
}
