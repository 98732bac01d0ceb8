//! Approximate nearest-neighbour index (HNSW) used by the table backend when
//! it is configured with `index_type: hnsw`.
//!
//! The index mirrors the rows of the table: every `put` upserts a slot, every
//! `delete` tombstones one, and the graph is rebuilt lazily on the next search
//! after a change. Below [`AnnConfig::min_vectors_for_ann`] live vectors the
//! index answers with an exact linear scan instead.
//!
//! Only `cosine` and `euclidean` graphs are supported; HNSW over a raw inner
//! product is rejected at configuration time.

use crate::distance::{DistanceFunction, cosine_similarity, squared_l2};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HNSW construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnConfig {
    /// Neighbours per node. Default: 16
    pub m: usize,
    /// Candidate list size during construction. Default: 200
    pub ef_construction: usize,
    /// Candidate list size during search. Default: 50
    pub ef_search: usize,
    /// Below this many live vectors a linear scan is used. Default: 10
    pub min_vectors_for_ann: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            min_vectors_for_ann: 10,
        }
    }
}

impl AnnConfig {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_min_vectors_for_ann(mut self, min: usize) -> Self {
        self.min_vectors_for_ann = min;
        self
    }
}

/// A candidate returned by the index (lower distance = closer).
#[derive(Debug, Clone, PartialEq)]
pub struct AnnResult {
    pub id: String,
    pub distance: f32,
}

enum Graph {
    Cosine(Hnsw<'static, f32, DistCosine>),
    L2(Hnsw<'static, f32, DistL2>),
}

impl Graph {
    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbour> {
        match self {
            Graph::Cosine(h) => h.search(query, k, ef),
            Graph::L2(h) => h.search(query, k, ef),
        }
    }
}

pub struct AnnIndex {
    config: AnnConfig,
    distance: DistanceFunction,
    dimension: usize,
    graph: Option<Graph>,
    id_to_slot: HashMap<String, usize>,
    slots: Vec<Option<(String, Vec<f32>)>>,
    live: usize,
    built: bool,
}

impl AnnIndex {
    pub fn new(
        dimension: usize,
        distance: DistanceFunction,
        config: AnnConfig,
    ) -> Result<Self, AnnError> {
        if distance == DistanceFunction::InnerProduct {
            return Err(AnnError::UnsupportedDistance(distance));
        }
        Ok(Self {
            config,
            distance,
            dimension,
            graph: None,
            id_to_slot: HashMap::new(),
            slots: Vec::new(),
            live: 0,
            built: false,
        })
    }

    /// Insert or replace the vector for `id`.
    pub fn upsert(&mut self, id: &str, vector: &[f32]) -> Result<(), AnnError> {
        if vector.len() != self.dimension {
            return Err(AnnError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        match self.id_to_slot.get(id) {
            Some(&slot) => self.slots[slot] = Some((id.to_string(), vector.to_vec())),
            None => {
                self.id_to_slot.insert(id.to_string(), self.slots.len());
                self.slots.push(Some((id.to_string(), vector.to_vec())));
                self.live += 1;
            }
        }
        self.built = false;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.id_to_slot.remove(id) {
            Some(slot) => {
                self.slots[slot] = None;
                self.live -= 1;
                self.built = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    fn uses_graph(&self) -> bool {
        self.live >= self.config.min_vectors_for_ann.max(1)
    }

    /// Rebuild the graph from the live slots if anything changed since the
    /// last build. Tombstoned slots are compacted away.
    pub fn build(&mut self) {
        if self.built {
            return;
        }
        if self.slots.len() != self.live {
            self.slots.retain(Option::is_some);
            self.id_to_slot = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(slot, entry)| entry.as_ref().map(|(id, _)| (id.clone(), slot)))
                .collect();
        }
        if !self.uses_graph() {
            self.graph = None;
            self.built = true;
            return;
        }

        let nb_elem = self.live;
        let nb_layer = 16.min(((nb_elem as f32).ln().trunc() as usize).max(1));
        let data: Vec<(&Vec<f32>, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|(_, v)| (v, slot)))
            .collect();

        let graph = match self.distance {
            DistanceFunction::Euclidean => {
                let hnsw = Hnsw::<f32, DistL2>::new(
                    self.config.m,
                    nb_elem,
                    nb_layer,
                    self.config.ef_construction,
                    DistL2 {},
                );
                hnsw.parallel_insert(&data);
                Graph::L2(hnsw)
            }
            _ => {
                let hnsw = Hnsw::<f32, DistCosine>::new(
                    self.config.m,
                    nb_elem,
                    nb_layer,
                    self.config.ef_construction,
                    DistCosine {},
                );
                hnsw.parallel_insert(&data);
                Graph::Cosine(hnsw)
            }
        };
        self.graph = Some(graph);
        self.built = true;
    }

    /// Up to `k` nearest candidates. Call [`build`](Self::build) first after
    /// changes; an unbuilt index falls back to a linear scan.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<AnnResult>, AnnError> {
        if query.len() != self.dimension {
            return Err(AnnError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if k == 0 || self.live == 0 {
            return Ok(Vec::new());
        }

        match (&self.graph, self.built && self.uses_graph()) {
            (Some(graph), true) => {
                let ef = self.config.ef_search.max(k);
                Ok(graph
                    .search(query, k, ef)
                    .into_iter()
                    .filter_map(|n| {
                        self.slots
                            .get(n.get_origin_id())
                            .and_then(Option::as_ref)
                            .map(|(id, _)| AnnResult {
                                id: id.clone(),
                                distance: n.distance,
                            })
                    })
                    .collect())
            }
            _ => Ok(self.linear_search(query, k)),
        }
    }

    fn linear_search(&self, query: &[f32], k: usize) -> Vec<AnnResult> {
        let mut results: Vec<AnnResult> = self
            .slots
            .iter()
            .flatten()
            .map(|(id, v)| AnnResult {
                id: id.clone(),
                distance: self.raw_distance(query, v),
            })
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(k);
        results
    }

    fn raw_distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance {
            DistanceFunction::Euclidean => squared_l2(a, b).sqrt(),
            _ => 1.0 - cosine_similarity(a, b),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnnError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("HNSW index does not support the `{0}` distance")]
    UnsupportedDistance(DistanceFunction),
}
