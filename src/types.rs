use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Open-schema document metadata.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A document handed to the store for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier, caller-assigned or derived from content.
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Build a document whose id is the SHA-256 hex digest of its content, so
    /// identical text always maps to the same record.
    pub fn from_content(content: impl Into<String>) -> Self {
        let content = content.into();
        let id = content_id(&content);
        Self {
            id,
            content,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach the computed vector, producing the record the backend stores.
    pub fn into_record(self, embedding: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: self.id,
            content: self.content,
            metadata: self.metadata,
            embedding,
        }
    }
}

/// SHA-256 hex of `content`.
pub fn content_id(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// What a backend stores per identifier: content and metadata as ingested,
/// plus the vector computed for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            embedding,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}
