use super::EmbeddingProvider;
use crate::distance::l2_normalize_in_place;
use crate::error::EmbeddingError;
use crate::types::Metadata;
use async_trait::async_trait;
use fxhash::hash64;

/// Deterministic provider deriving sinusoid values from a hash of the content.
///
/// Identical content always yields the identical vector, which makes it
/// suitable for tests and offline runs. It carries no semantic signal.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    normalize: bool,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            normalize: true,
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn embed_sync(&self, content: &str) -> Vec<f32> {
        let h = hash64(content.as_bytes());
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|idx| {
                let seed = h.rotate_left((idx % 64) as u32) ^ (idx as u64);
                ((seed >> 40) as f32 * 0.0001).sin()
            })
            .collect();
        if self.normalize {
            l2_normalize_in_place(&mut v);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, content: &str, _metadata: &Metadata) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(content))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}
