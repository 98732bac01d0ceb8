//! JSON snapshots used to seed a store once and to export its contents.
//!
//! The canonical form is an array:
//!
//! ```json
//! [
//!   {"id": "bike-1", "content": "...", "metadata": {"price": 2999}, "embedding": [0.1, 0.2]},
//!   {"id": "bike-2", "content": "..."}
//! ]
//! ```
//!
//! `vector` is accepted in place of `embedding`, and an object keyed by id is
//! accepted on load. Entries without an embedding are computed lazily by the
//! store after hydration.

use crate::error::StoreError;
use crate::types::{Document, EmbeddingRecord, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, alias = "vector", skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Either a ready record or a document still waiting for its vector.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotItem {
    Embedded(EmbeddingRecord),
    Pending(Document),
}

impl SnapshotEntry {
    pub fn into_item(self) -> SnapshotItem {
        let SnapshotEntry {
            id,
            content,
            metadata,
            embedding,
        } = self;
        match embedding {
            Some(embedding) => SnapshotItem::Embedded(EmbeddingRecord {
                id,
                content,
                metadata,
                embedding,
            }),
            None => SnapshotItem::Pending(Document {
                id,
                content,
                metadata,
            }),
        }
    }
}

impl From<EmbeddingRecord> for SnapshotEntry {
    fn from(record: EmbeddingRecord) -> Self {
        Self {
            id: record.id,
            content: record.content,
            metadata: record.metadata,
            embedding: Some(record.embedding),
        }
    }
}

impl From<Document> for SnapshotEntry {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            content: doc.content,
            metadata: doc.metadata,
            embedding: None,
        }
    }
}

#[derive(Deserialize)]
struct KeyedEntry {
    content: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default, alias = "vector")]
    embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotRepr {
    List(Vec<SnapshotEntry>),
    Keyed(BTreeMap<String, KeyedEntry>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from records, ordered by id so exports are stable.
    pub fn from_records<I: IntoIterator<Item = EmbeddingRecord>>(records: I) -> Self {
        let mut entries: Vec<SnapshotEntry> = records.into_iter().map(Into::into).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Self { entries }
    }

    pub fn push(&mut self, entry: impl Into<SnapshotEntry>) {
        self.entries.push(entry.into());
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SnapshotEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let repr: SnapshotRepr = serde_json::from_str(json)
            .map_err(|e| StoreError::Snapshot(format!("malformed snapshot: {e}")))?;
        let entries = match repr {
            SnapshotRepr::List(entries) => entries,
            SnapshotRepr::Keyed(map) => map
                .into_iter()
                .map(|(id, entry)| SnapshotEntry {
                    id,
                    content: entry.content,
                    metadata: entry.metadata,
                    embedding: entry.embedding,
                })
                .collect(),
        };
        Ok(Self { entries })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| StoreError::Snapshot(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(&self.entries).map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Write the array form to `path`, replacing it atomically.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = self.to_json()?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Snapshot(format!("cannot create {}: {e}", parent.display())))?;
        }
        fs::write(tmp, json)
            .map_err(|e| StoreError::Snapshot(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(tmp, path)
            .map_err(|e| StoreError::Snapshot(format!("cannot replace {}: {e}", path.display())))?;
        Ok(())
    }
}
