use crate::backend::StoreBackend;
use crate::error::StoreError;
use crate::types::{EmbeddingRecord, Metadata};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Default multiplier applied to `k` when asking a native index for candidates.
pub const DEFAULT_OVERSAMPLE_FACTOR: usize = 2;

/// A similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub k: usize,
    /// Hits scoring below this are dropped.
    pub similarity_threshold: Option<f32>,
    /// Metadata equality filter; every pair must match.
    pub filter: Metadata,
}

impl SearchRequest {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            similarity_threshold: None,
            filter: Metadata::new(),
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    fn accepts(&self, score: f32, record: &EmbeddingRecord) -> bool {
        if let Some(threshold) = self.similarity_threshold {
            if score < threshold {
                return false;
            }
        }
        self.filter
            .iter()
            .all(|(key, value)| record.metadata.get(key) == Some(value))
    }
}

/// Result entry for a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Higher is more similar; scale depends on the distance function.
    pub score: f32,
    pub content: String,
    pub metadata: Metadata,
}

impl SearchHit {
    fn from_record(record: &EmbeddingRecord, score: f32) -> Self {
        Self {
            id: record.id.clone(),
            score,
            content: record.content.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

/// Rank order: score descending, then id ascending. `Less` ranks first.
/// A NaN score ranks below every real one.
fn rank(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    let key = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
    key(b_score)
        .total_cmp(&key(a_score))
        .then_with(|| a_id.cmp(b_id))
}

struct Ranked(SearchHit);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        rank(self.0.score, &self.0.id, other.0.score, &other.0.id)
    }
}

/// Keeps the best `k` hits seen so far; the heap top is the worst kept hit.
struct TopK {
    k: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn offer(&mut self, record: &EmbeddingRecord, score: f32) {
        if self.heap.len() == self.k {
            match self.heap.peek() {
                Some(worst) if rank(score, &record.id, worst.0.score, &worst.0.id).is_lt() => {}
                _ => return,
            }
        }
        self.heap.push(Ranked(SearchHit::from_record(record, score)));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    fn into_hits(self) -> Vec<SearchHit> {
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

/// Rank the backend's records against `request`.
///
/// Backends with a native index supply `k * oversample_factor` candidates that
/// are re-scored exactly; all others are scanned in full.
pub(crate) fn search(
    backend: &dyn StoreBackend,
    request: &SearchRequest,
    oversample_factor: usize,
) -> Result<Vec<SearchHit>, StoreError> {
    StoreError::check_dimension(backend.dimension(), request.vector.len())?;
    StoreError::check_finite(&request.vector)?;
    if request.k == 0 {
        return Ok(Vec::new());
    }

    let distance = backend.distance();
    let mut top = TopK::new(request.k);
    let mut consider = |record: &EmbeddingRecord| {
        let score = distance.score(&request.vector, &record.embedding);
        if request.accepts(score, record) {
            top.offer(record, score);
        }
    };

    let candidates = request.k.saturating_mul(oversample_factor.max(1));
    match backend.nearest(&request.vector, candidates)? {
        Some(ids) => {
            for id in ids {
                // A row deleted since the index answered is simply skipped.
                if let Some(record) = backend.get(&id)? {
                    consider(&record);
                }
            }
        }
        None => backend.scan(&mut |record| {
            consider(record);
            Ok(())
        })?,
    }

    Ok(top.into_hits())
}
