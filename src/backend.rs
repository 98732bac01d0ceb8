use crate::ann::AnnConfig;
use crate::distance::DistanceFunction;
use crate::error::StoreError;
use crate::snapshot::Snapshot;
use crate::types::EmbeddingRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Persistence capability for embedding records.
///
/// Backends answer one question for the store ("does this id already have a
/// vector?") and own everything about where records live. They never decide
/// whether an embedding gets computed.
pub trait StoreBackend: Send + Sync {
    /// Short name used in logs (`in_memory`, `relational`, `document_store`).
    fn name(&self) -> &'static str;
    /// Vector length every stored record has.
    fn dimension(&self) -> usize;
    /// Distance function used to rank this backend's records.
    fn distance(&self) -> DistanceFunction {
        DistanceFunction::Cosine
    }
    fn contains(&self, id: &str) -> Result<bool, StoreError>;
    fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>, StoreError>;
    /// Insert or replace the record stored under `record.id`, atomically.
    fn put(&self, record: EmbeddingRecord) -> Result<(), StoreError>;
    /// Remove a record. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
    fn len(&self) -> Result<usize, StoreError>;
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
    /// Visit every stored record. Order is unspecified.
    fn scan(
        &self,
        visitor: &mut dyn FnMut(&EmbeddingRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
    fn load_all(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let mut records = Vec::new();
        self.scan(&mut |record| {
            records.push(record.clone());
            Ok(())
        })?;
        Ok(records)
    }
    /// Flush any buffered writes.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
    /// File this backend persists itself to as a snapshot, if any.
    ///
    /// The store writes its full export there on flush, pending documents
    /// included.
    fn snapshot_path(&self) -> Option<&Path> {
        None
    }
    /// Candidate ids from a native vector index, closest first.
    ///
    /// `None` means the backend has no index and the caller should scan.
    fn nearest(&self, _query: &[f32], _k: usize) -> Result<Option<Vec<String>>, StoreError> {
        Ok(None)
    }
}

/// Native vector index kept alongside a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    #[default]
    None,
    Hnsw,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::None => "none",
            IndexType::Hnsw => "hnsw",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects and builds a backend once at startup.
///
/// ```
/// use embedstore::BackendConfig;
///
/// let config = BackendConfig::in_memory();
/// let backend = config.build(3, Default::default()).unwrap();
/// assert_eq!(backend.dimension(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BackendConfig {
    /// Process-local map, optionally bound to a snapshot file written on `flush`.
    #[default]
    InMemory,
    InMemorySnapshot { snapshot_path: PathBuf },
    /// One row per record in a redb table, with an optional HNSW index.
    ///
    /// Requires the `relational` feature.
    Relational {
        path: PathBuf,
        index_type: IndexType,
        ann: AnnConfig,
    },
    /// JSON documents in a named sled tree.
    ///
    /// Requires the `document-store` feature.
    DocumentStore { path: PathBuf, collection: String },
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn in_memory_with_snapshot<P: Into<PathBuf>>(snapshot_path: P) -> Self {
        BackendConfig::InMemorySnapshot {
            snapshot_path: snapshot_path.into(),
        }
    }

    pub fn relational<P: Into<PathBuf>>(path: P) -> Self {
        BackendConfig::Relational {
            path: path.into(),
            index_type: IndexType::None,
            ann: AnnConfig::default(),
        }
    }

    pub fn relational_hnsw<P: Into<PathBuf>>(path: P, ann: AnnConfig) -> Self {
        BackendConfig::Relational {
            path: path.into(),
            index_type: IndexType::Hnsw,
            ann,
        }
    }

    pub fn document_store<P: Into<PathBuf>, C: Into<String>>(path: P, collection: C) -> Self {
        BackendConfig::DocumentStore {
            path: path.into(),
            collection: collection.into(),
        }
    }

    /// Snapshot file the store should hydrate from, if this variant has one.
    pub fn snapshot_path(&self) -> Option<&PathBuf> {
        match self {
            BackendConfig::InMemorySnapshot { snapshot_path } => Some(snapshot_path),
            _ => None,
        }
    }

    /// Build the configured backend for vectors of length `dimension`.
    ///
    /// Variants whose cargo feature is disabled fail with
    /// [`StoreError::Config`].
    pub fn build(
        &self,
        dimension: usize,
        distance: DistanceFunction,
    ) -> Result<Box<dyn StoreBackend>, StoreError> {
        if dimension == 0 {
            return Err(StoreError::config("dimension must be greater than zero"));
        }
        match self {
            BackendConfig::InMemory => Ok(Box::new(InMemoryBackend::new(dimension, distance))),
            BackendConfig::InMemorySnapshot { snapshot_path } => Ok(Box::new(
                InMemoryBackend::new(dimension, distance).with_snapshot_path(snapshot_path),
            )),
            BackendConfig::Relational {
                path,
                index_type,
                ann,
            } => {
                #[cfg(feature = "relational")]
                {
                    Ok(Box::new(TableBackend::open(
                        path,
                        TableSettings {
                            dimension,
                            distance,
                            index_type: *index_type,
                        },
                        *ann,
                    )?))
                }
                #[cfg(not(feature = "relational"))]
                {
                    let _ = (path, index_type, ann);
                    Err(StoreError::config(
                        "relational backend disabled at compile time",
                    ))
                }
            }
            BackendConfig::DocumentStore { path, collection } => {
                #[cfg(feature = "document-store")]
                {
                    Ok(Box::new(CollectionBackend::open(
                        path, collection, dimension, distance,
                    )?))
                }
                #[cfg(not(feature = "document-store"))]
                {
                    let _ = (path, collection);
                    Err(StoreError::config(
                        "document-store backend disabled at compile time",
                    ))
                }
            }
        }
    }
}

/// Process-local backend: a `RwLock` around a `HashMap`.
///
/// When bound to a snapshot path, [`flush`](StoreBackend::flush) writes every
/// record there. Nothing is written otherwise.
pub struct InMemoryBackend {
    dimension: usize,
    distance: DistanceFunction,
    records: RwLock<HashMap<String, EmbeddingRecord>>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryBackend {
    pub fn new(dimension: usize, distance: DistanceFunction) -> Self {
        Self {
            dimension,
            distance,
            records: RwLock::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }
}

impl StoreBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn distance(&self) -> DistanceFunction {
        self.distance
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        Ok(guard.contains_key(id))
    }

    fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>, StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        Ok(guard.get(id).cloned())
    }

    fn put(&self, record: EmbeddingRecord) -> Result<(), StoreError> {
        StoreError::check_dimension(self.dimension, record.dimension())?;
        self.records
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .insert(record.id.clone(), record);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .remove(id)
            .is_some())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self
            .records
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .len())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&EmbeddingRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let guard = self
            .records
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        for record in guard.values() {
            visitor(record)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        match &self.snapshot_path {
            Some(path) => Snapshot::from_records(self.load_all()?).write_to(path),
            None => Ok(()),
        }
    }

    fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }
}

#[cfg(feature = "relational")]
pub mod table;

#[cfg(feature = "relational")]
pub use table::{TableBackend, TableSettings};

#[cfg(feature = "document-store")]
pub mod collection;

#[cfg(feature = "document-store")]
pub use collection::CollectionBackend;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, v: [f32; 3]) -> EmbeddingRecord {
        EmbeddingRecord::new(id, format!("content of {id}"), v.to_vec())
    }

    #[test]
    fn in_memory_put_get_delete() {
        let backend = InMemoryBackend::new(3, DistanceFunction::Cosine);
        assert!(backend.is_empty().unwrap());

        backend.put(record("a", [1.0, 0.0, 0.0])).unwrap();
        assert!(backend.contains("a").unwrap());
        assert!(!backend.contains("b").unwrap());
        assert_eq!(backend.get("a").unwrap().unwrap().embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(backend.len().unwrap(), 1);

        assert!(backend.delete("a").unwrap());
        assert!(!backend.delete("a").unwrap());
        assert!(backend.get("a").unwrap().is_none());
    }

    #[test]
    fn in_memory_rejects_wrong_dimension() {
        let backend = InMemoryBackend::new(3, DistanceFunction::Cosine);
        let err = backend
            .put(EmbeddingRecord::new("a", "x", vec![1.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn in_memory_has_no_native_index() {
        let backend = InMemoryBackend::new(3, DistanceFunction::Cosine);
        backend.put(record("a", [1.0, 0.0, 0.0])).unwrap();
        assert!(backend.nearest(&[1.0, 0.0, 0.0], 1).unwrap().is_none());
    }

    #[test]
    fn in_memory_flush_writes_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let backend =
            InMemoryBackend::new(3, DistanceFunction::Cosine).with_snapshot_path(&path);

        backend.put(record("b", [0.0, 1.0, 0.0])).unwrap();
        backend.put(record("a", [1.0, 0.0, 0.0])).unwrap();
        assert!(!path.exists());
        backend.flush().unwrap();

        let snapshot = Snapshot::from_file(&path).unwrap();
        let ids: Vec<_> = snapshot.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn in_memory_flush_without_path_is_noop() {
        let backend = InMemoryBackend::new(3, DistanceFunction::Cosine);
        assert!(backend.snapshot_path().is_none());
        backend.put(record("a", [1.0, 0.0, 0.0])).unwrap();
        backend.flush().unwrap();
    }

    #[test]
    fn build_rejects_zero_dimension() {
        let err = BackendConfig::in_memory()
            .build(0, DistanceFunction::Cosine)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn build_in_memory_carries_settings() {
        let backend = BackendConfig::in_memory()
            .build(4, DistanceFunction::Euclidean)
            .unwrap();
        assert_eq!(backend.name(), "in_memory");
        assert_eq!(backend.dimension(), 4);
        assert_eq!(backend.distance(), DistanceFunction::Euclidean);
    }

    #[test]
    fn snapshot_path_only_for_snapshot_variant() {
        assert!(BackendConfig::in_memory().snapshot_path().is_none());
        let config = BackendConfig::in_memory_with_snapshot("/tmp/x.json");
        assert_eq!(config.snapshot_path(), Some(&PathBuf::from("/tmp/x.json")));
    }
}
