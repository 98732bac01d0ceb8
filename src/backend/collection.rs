//! Document-store backend: records as JSON documents in a named sled tree.
//!
//! The collection name selects the tree, so several stores can share one
//! database directory. A `__settings` tree records each collection's
//! dimension and distance; reopening a collection with different values is a
//! configuration error.

use super::StoreBackend;
use crate::distance::DistanceFunction;
use crate::error::StoreError;
use crate::types::EmbeddingRecord;
use std::path::Path;

const SETTINGS_TREE: &str = "__settings";

pub struct CollectionBackend {
    db: sled::Db,
    tree: sled::Tree,
    collection: String,
    dimension: usize,
    distance: DistanceFunction,
}

impl CollectionBackend {
    pub fn open<P: AsRef<Path>>(
        path: P,
        collection: &str,
        dimension: usize,
        distance: DistanceFunction,
    ) -> Result<Self, StoreError> {
        if collection.is_empty() || collection == SETTINGS_TREE {
            return Err(StoreError::Config(format!(
                "invalid collection name `{collection}`"
            )));
        }
        let db = sled::open(path).map_err(StoreError::backend)?;
        let tree = db.open_tree(collection).map_err(StoreError::backend)?;

        let settings = db.open_tree(SETTINGS_TREE).map_err(StoreError::backend)?;
        let expected = [
            ("dimension", dimension.to_string()),
            ("distance", distance.as_str().to_string()),
        ];
        for (name, value) in &expected {
            let key = format!("{collection}.{name}");
            match settings.get(key.as_bytes()).map_err(StoreError::backend)? {
                Some(stored) if stored.as_ref() != value.as_bytes() => {
                    return Err(StoreError::Config(format!(
                        "collection `{collection}` was created with {name} `{}`, configured `{value}`",
                        String::from_utf8_lossy(&stored)
                    )));
                }
                Some(_) => {}
                None => {
                    settings
                        .insert(key.as_bytes(), value.as_bytes())
                        .map_err(StoreError::backend)?;
                }
            }
        }

        Ok(Self {
            db,
            tree,
            collection: collection.to_string(),
            dimension,
            distance,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl StoreBackend for CollectionBackend {
    fn name(&self) -> &'static str {
        "document_store"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn distance(&self) -> DistanceFunction {
        self.distance
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        self.tree
            .contains_key(id.as_bytes())
            .map_err(StoreError::backend)
    }

    fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>, StoreError> {
        match self.tree.get(id.as_bytes()).map_err(StoreError::backend)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: EmbeddingRecord) -> Result<(), StoreError> {
        StoreError::check_dimension(self.dimension, record.dimension())?;
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.tree
            .insert(record.id.as_bytes(), bytes)
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .tree
            .remove(id.as_bytes())
            .map_err(StoreError::backend)?
            .is_some())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.tree.len())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&EmbeddingRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        for item in self.tree.iter() {
            let (_, bytes) = item.map_err(StoreError::backend)?;
            let record: EmbeddingRecord = serde_json::from_slice(&bytes)?;
            visitor(&record)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(StoreError::backend)?;
        Ok(())
    }
}
