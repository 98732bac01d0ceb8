//! Relational-style backend: one row per record in a redb table.
//!
//! Layout of the database file:
//!
//! | table        | key           | value                                   |
//! |--------------|---------------|-----------------------------------------|
//! | `embeddings` | record id     | bincode row (content, metadata, vector) |
//! | `settings`   | setting name  | `dimension`, `distance`, `index_type`   |
//!
//! Settings are written when the file is created and checked on every reopen;
//! a mismatch is a configuration error rather than silent reuse. With
//! `index_type: hnsw` an in-process HNSW index is built from the table and
//! kept in step with every write.

use super::{IndexType, StoreBackend};
use crate::ann::{AnnConfig, AnnIndex};
use crate::distance::DistanceFunction;
use crate::error::StoreError;
use crate::types::{EmbeddingRecord, Metadata};
use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

const EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Store-wide settings persisted in the `settings` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSettings {
    pub dimension: usize,
    pub distance: DistanceFunction,
    pub index_type: IndexType,
}

/// Metadata is arbitrary JSON, which bincode cannot describe; it travels as
/// JSON bytes inside the row.
mod metadata_bytes {
    use crate::types::Metadata;
    use serde::de::Error as DeError;
    use serde::ser::Error as SerError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Metadata, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes = serde_json::to_vec(value).map_err(SerError::custom)?;
        serializer.serialize_bytes(&bytes)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        serde_json::from_slice(&bytes).map_err(DeError::custom)
    }
}

#[derive(Serialize, Deserialize)]
struct Row {
    content: String,
    #[serde(with = "metadata_bytes")]
    metadata: Metadata,
    embedding: Vec<f32>,
}

fn encode_row(record: &EmbeddingRecord) -> Result<Vec<u8>, StoreError> {
    let row = Row {
        content: record.content.clone(),
        metadata: record.metadata.clone(),
        embedding: record.embedding.clone(),
    };
    encode_to_vec(&row, standard()).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode_row(id: &str, bytes: &[u8]) -> Result<EmbeddingRecord, StoreError> {
    let (row, _): (Row, usize) =
        decode_from_slice(bytes, standard()).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(EmbeddingRecord {
        id: id.to_string(),
        content: row.content,
        metadata: row.metadata,
        embedding: row.embedding,
    })
}

pub struct TableBackend {
    db: Arc<Database>,
    settings: TableSettings,
    ann: Option<RwLock<AnnIndex>>,
}

impl TableBackend {
    /// Open or create the database at `path`.
    ///
    /// A new file records `settings`; an existing one must carry the same
    /// settings or opening fails with [`StoreError::Config`].
    pub fn open<P: AsRef<Path>>(
        path: P,
        settings: TableSettings,
        ann_config: AnnConfig,
    ) -> Result<Self, StoreError> {
        let ann = match settings.index_type {
            IndexType::Hnsw => Some(RwLock::new(
                AnnIndex::new(settings.dimension, settings.distance, ann_config)
                    .map_err(StoreError::config)?,
            )),
            IndexType::None => None,
        };

        let db = Database::create(path).map_err(StoreError::backend)?;
        let write_txn = db.begin_write().map_err(StoreError::backend)?;
        {
            // Opening creates the tables on first use.
            let _embeddings = write_txn
                .open_table(EMBEDDINGS)
                .map_err(StoreError::backend)?;
            let mut table = write_txn.open_table(SETTINGS).map_err(StoreError::backend)?;
            let expected = [
                ("dimension", settings.dimension.to_string()),
                ("distance", settings.distance.as_str().to_string()),
                ("index_type", settings.index_type.as_str().to_string()),
            ];
            for (key, value) in &expected {
                let stored = table
                    .get(*key)
                    .map_err(StoreError::backend)?
                    .map(|v| v.value().to_string());
                match stored {
                    Some(stored) if stored != *value => {
                        return Err(StoreError::Config(format!(
                            "table was created with {key} `{stored}`, configured `{value}`"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        table
                            .insert(*key, value.as_str())
                            .map_err(StoreError::backend)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(StoreError::backend)?;

        let backend = Self {
            db: Arc::new(db),
            settings,
            ann,
        };
        backend.load_index()?;
        Ok(backend)
    }

    pub fn settings(&self) -> TableSettings {
        self.settings
    }

    pub fn has_index(&self) -> bool {
        self.ann.is_some()
    }

    fn load_index(&self) -> Result<(), StoreError> {
        let Some(ann) = &self.ann else {
            return Ok(());
        };
        let mut index = ann
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))?;
        let mut rows = 0usize;
        self.scan(&mut |record| {
            rows += 1;
            index
                .upsert(&record.id, &record.embedding)
                .map_err(StoreError::backend)
        })?;
        debug!(rows, "table_index_loaded");
        Ok(())
    }
}

impl StoreBackend for TableBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn dimension(&self) -> usize {
        self.settings.dimension
    }

    fn distance(&self) -> DistanceFunction {
        self.settings.distance
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(StoreError::backend)?;
        Ok(table.get(id).map_err(StoreError::backend)?.is_some())
    }

    fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(StoreError::backend)?;
        match table.get(id).map_err(StoreError::backend)? {
            Some(value) => Ok(Some(decode_row(id, value.value())?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: EmbeddingRecord) -> Result<(), StoreError> {
        StoreError::check_dimension(self.settings.dimension, record.dimension())?;
        let bytes = encode_row(&record)?;

        let write_txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(StoreError::backend)?;
            table
                .insert(record.id.as_str(), bytes.as_slice())
                .map_err(StoreError::backend)?;
        }
        write_txn.commit().map_err(StoreError::backend)?;

        if let Some(ann) = &self.ann {
            ann.write()
                .map_err(|_| StoreError::backend("poisoned lock"))?
                .upsert(&record.id, &record.embedding)
                .map_err(StoreError::backend)?;
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::backend)?;
        let existed = {
            let mut table = write_txn
                .open_table(EMBEDDINGS)
                .map_err(StoreError::backend)?;
            let removed = table.remove(id).map_err(StoreError::backend)?;
            removed.is_some()
        };
        write_txn.commit().map_err(StoreError::backend)?;

        if let Some(ann) = &self.ann {
            ann.write()
                .map_err(|_| StoreError::backend("poisoned lock"))?
                .remove(id);
        }
        Ok(existed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(StoreError::backend)?;
        let count = table.len().map_err(StoreError::backend)?;
        Ok(count as usize)
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&EmbeddingRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn
            .open_table(EMBEDDINGS)
            .map_err(StoreError::backend)?;
        for item in table.iter().map_err(StoreError::backend)? {
            let (key, value) = item.map_err(StoreError::backend)?;
            let record = decode_row(key.value(), value.value())?;
            visitor(&record)?;
        }
        Ok(())
    }

    fn nearest(&self, query: &[f32], k: usize) -> Result<Option<Vec<String>>, StoreError> {
        let Some(ann) = &self.ann else {
            return Ok(None);
        };
        let stale = !ann
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .is_built();
        if stale {
            // build() is a no-op if another caller got here first.
            ann.write()
                .map_err(|_| StoreError::backend("poisoned lock"))?
                .build();
        }
        let hits = ann
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))?
            .search(query, k)
            .map_err(StoreError::backend)?;
        Ok(Some(hits.into_iter().map(|hit| hit.id).collect()))
    }
}
