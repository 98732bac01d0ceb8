//! YAML configuration for building a store.
//!
//! ```yaml
//! version: "1.0"
//! name: "product-catalog"
//! dimension: 384
//!
//! backend:
//!   kind: relational          # in_memory | relational | document_store
//!   path: "/data/catalog.redb"
//!   distance: cosine          # cosine | euclidean | inner_product
//!   index_type: hnsw          # none | hnsw
//!   ann:
//!     m: 16
//!     ef_construction: 200
//!     ef_search: 50
//!
//! provider:
//!   kind: api                 # hash | api
//!   url: "https://api.openai.com/v1/embeddings"
//!   api_provider: openai      # openai | hf | custom
//!   model: "text-embedding-3-small"
//!   auth_header_env: "EMBEDSTORE_AUTH"
//!   timeout_ms: 30000
//!   retry:
//!     max_retries: 3
//!     base_delay: 100
//!
//! search:
//!   oversample_factor: 2
//! ```
//!
//! Any backend may name a `snapshot_path`; an empty store is seeded from it
//! when built. Only `in_memory` writes the file back on `flush`; durable
//! backends treat it as a one-time seed.

use crate::ann::AnnConfig;
use crate::backend::{BackendConfig, IndexType, StoreBackend};
use crate::distance::DistanceFunction;
use crate::embedding::{EmbeddingProvider, HashEmbedder, RetryConfig};
use crate::error::StoreError;
use crate::query::DEFAULT_OVERSAMPLE_FACTOR;
use crate::store::LazyEmbeddingStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Vector length shared by provider, backend and queries.
    pub dimension: usize,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub provider: ProviderSection,

    #[serde(default)]
    pub search: SearchSection,
}

impl StoreConfig {
    /// In-memory store with the hash provider.
    pub fn new(dimension: usize) -> Self {
        Self {
            version: default_version(),
            name: None,
            dimension,
            backend: BackendSection::default(),
            provider: ProviderSection::default(),
            search: SearchSection::default(),
        }
    }

    pub fn with_backend(mut self, backend: BackendSection) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_provider(mut self, provider: ProviderSection) -> Self {
        self.provider = provider;
        self
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigError::UnsupportedVersion(v.to_string())),
        }?;

        if self.dimension == 0 {
            return Err(ConfigError::Validation(
                "dimension must be >= 1".to_string(),
            ));
        }
        self.backend.validate()?;
        self.provider.validate()?;
        if self.search.oversample_factor == 0 {
            return Err(ConfigError::Validation(
                "search.oversample_factor must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        let backend = &self.backend;
        match backend.kind {
            BackendKind::InMemory => match &backend.snapshot_path {
                Some(path) => BackendConfig::in_memory_with_snapshot(path),
                None => BackendConfig::in_memory(),
            },
            BackendKind::Relational => BackendConfig::Relational {
                path: backend.path.clone().unwrap_or_default(),
                index_type: backend.index_type,
                ann: backend.ann,
            },
            BackendKind::DocumentStore => BackendConfig::document_store(
                backend.path.clone().unwrap_or_default(),
                backend.collection.clone(),
            ),
        }
    }

    pub fn build_backend(&self) -> Result<Box<dyn StoreBackend>, StoreError> {
        self.backend_config()
            .build(self.dimension, self.backend.distance)
    }

    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>, StoreError> {
        let provider = &self.provider;
        match provider.kind {
            ProviderKind::Hash => Ok(Arc::new(
                HashEmbedder::new(self.dimension).with_normalize(provider.normalize),
            )),
            ProviderKind::Api => {
                #[cfg(feature = "api")]
                {
                    use crate::embedding::{ApiConfig, ApiEmbedder, ApiProviderKind};

                    let url = provider
                        .url
                        .clone()
                        .ok_or_else(|| StoreError::config("provider.url is required"))?;
                    let kind = match provider.api_provider.as_deref() {
                        Some(kind) => kind.parse::<ApiProviderKind>()?,
                        None => ApiProviderKind::Custom,
                    };
                    let mut api = ApiConfig::new(url)
                        .with_kind(kind)
                        .with_timeout(std::time::Duration::from_millis(provider.timeout_ms))
                        .with_normalize(provider.normalize)
                        .with_retry(provider.retry);
                    if let Some(model) = &provider.model {
                        api = api.with_model(model.clone());
                    }
                    if let Some(header) = provider.resolve_auth_header()? {
                        api = api.with_auth_header(header);
                    }
                    Ok(Arc::new(ApiEmbedder::new(api, self.dimension)?))
                }
                #[cfg(not(feature = "api"))]
                {
                    Err(StoreError::config("api provider disabled at compile time"))
                }
            }
        }
    }

    /// Build backend and provider, then hydrate from `backend.snapshot_path`
    /// when that file exists. Hydration leaves a non-empty backend alone.
    pub async fn build_store(&self) -> Result<LazyEmbeddingStore, StoreError> {
        let store = LazyEmbeddingStore::new(self.build_backend()?, self.build_provider()?)?
            .with_oversample_factor(self.search.oversample_factor);

        if let Some(path) = &self.backend.snapshot_path {
            if path.exists() {
                store.hydrate_from_file(path).await?;
            } else {
                info!(path = %path.display(), "snapshot_absent");
            }
        }
        Ok(store)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Relational,
    DocumentStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub kind: BackendKind,

    /// Database file (relational) or directory (document_store).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// JSON snapshot that seeds an empty store. The in_memory backend also
    /// writes it back on flush.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub distance: DistanceFunction,

    #[serde(default)]
    pub index_type: IndexType,

    #[serde(default)]
    pub ann: AnnConfig,
}

impl BackendSection {
    pub fn relational<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            kind: BackendKind::Relational,
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn document_store<P: Into<PathBuf>>(path: P, collection: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::DocumentStore,
            path: Some(path.into()),
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn with_distance(mut self, distance: DistanceFunction) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    pub fn with_snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            BackendKind::Relational | BackendKind::DocumentStore if self.path.is_none() => {
                return Err(ConfigError::Validation(format!(
                    "backend.path is required when backend.kind is '{}'",
                    self.kind_str()
                )));
            }
            BackendKind::DocumentStore if self.collection.trim().is_empty() => {
                return Err(ConfigError::Validation(
                    "backend.collection must not be empty".to_string(),
                ));
            }
            _ => {}
        }
        if self.index_type == IndexType::Hnsw {
            if self.kind != BackendKind::Relational {
                return Err(ConfigError::Validation(
                    "backend.index_type 'hnsw' is only supported by the relational backend"
                        .to_string(),
                ));
            }
            if self.distance == DistanceFunction::InnerProduct {
                return Err(ConfigError::Validation(
                    "backend.index_type 'hnsw' supports cosine and euclidean distance".to_string(),
                ));
            }
            if self.ann.m == 0 || self.ann.ef_construction == 0 || self.ann.ef_search == 0 {
                return Err(ConfigError::Validation(
                    "backend.ann parameters must be >= 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn kind_str(&self) -> &'static str {
        match self.kind {
            BackendKind::InMemory => "in_memory",
            BackendKind::Relational => "relational",
            BackendKind::DocumentStore => "document_store",
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::InMemory,
            path: None,
            snapshot_path: None,
            collection: default_collection(),
            distance: DistanceFunction::Cosine,
            index_type: IndexType::None,
            ann: AnnConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Hash,
    Api,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "true_value")]
    pub normalize: bool,

    #[serde(default)]
    pub url: Option<String>,

    /// `openai`, `hf` or `custom`.
    #[serde(default)]
    pub api_provider: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub auth_header: Option<String>,

    /// Environment variable holding the `Authorization` header value.
    #[serde(default)]
    pub auth_header_env: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl ProviderSection {
    pub fn api(url: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Api,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == ProviderKind::Api {
            match self.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => {
                    return Err(ConfigError::Validation(format!(
                        "provider.url must be an http(s) URL, got '{url}'"
                    )));
                }
                None => {
                    return Err(ConfigError::Validation(
                        "provider.url is required when provider.kind is 'api'".to_string(),
                    ));
                }
            }
            let valid_providers = ["openai", "gpt", "hf", "huggingface", "hugging_face", "custom"];
            if let Some(kind) = self.api_provider.as_deref() {
                if !valid_providers.contains(&kind.to_ascii_lowercase().as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "provider.api_provider must be one of: {valid_providers:?}"
                    )));
                }
            }
            if self.timeout_ms == 0 {
                return Err(ConfigError::Validation(
                    "provider.timeout_ms must be >= 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn resolve_auth_header(&self) -> Result<Option<String>, StoreError> {
        if let Some(header) = &self.auth_header {
            return Ok(Some(header.clone()));
        }
        match &self.auth_header_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| StoreError::Config(format!("environment variable {var} is not set"))),
            None => Ok(None),
        }
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Hash,
            normalize: true,
            url: None,
            api_provider: None,
            model: None,
            auth_header: None,
            auth_header_env: None,
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_oversample")]
    pub oversample_factor: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            oversample_factor: DEFAULT_OVERSAMPLE_FACTOR,
        }
    }
}

// Helper functions for serde defaults
fn default_version() -> String {
    "1.0".to_string()
}
fn default_collection() -> String {
    "embeddings".to_string()
}
fn true_value() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_oversample() -> usize {
    DEFAULT_OVERSAMPLE_FACTOR
}
