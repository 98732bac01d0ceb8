//! # embedstore
//!
//! A document-embedding store that computes each document's vector once.
//!
//! Documents go in through [`LazyEmbeddingStore::add`]. The store asks its
//! [`StoreBackend`] whether the id already has a vector; only ids it has never
//! seen reach the [`EmbeddingProvider`]. Stored records can then be ranked
//! against a query vector (or query text) with [`LazyEmbeddingStore::search`].
//!
//! ## Backends
//!
//! - [`InMemoryBackend`]: a process-local map, optionally bound to a JSON
//!   snapshot file.
//! - [`TableBackend`] (feature `relational`): one row per record in a redb
//!   table, with a store-wide distance function and an optional HNSW index.
//! - [`CollectionBackend`] (feature `document-store`): JSON documents in a
//!   named sled tree.
//!
//! Pick one at startup through [`BackendConfig`] or a YAML [`StoreConfig`].
//!
//! ## Example
//!
//! ```
//! use embedstore::{BackendConfig, Document, HashEmbedder, LazyEmbeddingStore};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = BackendConfig::in_memory().build(64, Default::default()).unwrap();
//! let store = LazyEmbeddingStore::new(backend, Arc::new(HashEmbedder::new(64))).unwrap();
//!
//! let report = store
//!     .add(vec![
//!         Document::new("bike-1", "Lightweight commuter e-bike"),
//!         Document::new("bike-2", "Cargo bike with 80km range"),
//!     ])
//!     .await
//!     .unwrap();
//! assert_eq!(report.added.len(), 2);
//!
//! // Known ids are never embedded again.
//! let again = store.add(vec![Document::new("bike-1", "changed text")]).await.unwrap();
//! assert_eq!(again.skipped, vec!["bike-1".to_string()]);
//!
//! let hits = store.similarity_search("Cargo bike with 80km range", 1).await.unwrap();
//! assert_eq!(hits[0].id, "bike-2");
//! # });
//! ```

pub mod ann;
pub mod backend;
pub mod config;
pub mod distance;
pub mod embedding;
mod error;
mod metrics;
mod query;
pub mod snapshot;
mod store;
mod types;

pub use crate::ann::AnnConfig;
#[cfg(feature = "document-store")]
pub use crate::backend::CollectionBackend;
pub use crate::backend::{BackendConfig, InMemoryBackend, IndexType, StoreBackend};
#[cfg(feature = "relational")]
pub use crate::backend::{TableBackend, TableSettings};
pub use crate::config::{
    BackendKind, BackendSection, ConfigError, ProviderKind, ProviderSection, SearchSection,
    StoreConfig,
};
pub use crate::distance::DistanceFunction;
#[cfg(feature = "api")]
pub use crate::embedding::{ApiConfig, ApiEmbedder, ApiProviderKind};
pub use crate::embedding::{EmbeddingProvider, HashEmbedder, RetryConfig};
pub use crate::error::{EmbeddingError, StoreError};
pub use crate::metrics::StoreMetrics;
pub use crate::query::{DEFAULT_OVERSAMPLE_FACTOR, SearchHit, SearchRequest};
pub use crate::snapshot::{Snapshot, SnapshotEntry};
pub use crate::store::{AddFailure, AddReport, HydrationReport, LazyEmbeddingStore};
pub use crate::types::{Document, EmbeddingRecord, Metadata, content_id};
